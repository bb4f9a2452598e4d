use crate::broker::{TargetKind, TargetRecord};
use serde::Deserialize;

/// Complete broker configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BrokerConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub clients: TargetClientsConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    /// Connected services known to this deployment (read-only registry)
    #[serde(default)]
    pub targets: Vec<TargetRecord>,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// How often expired session rows are purged
    #[serde(default = "default_session_cleanup_interval")]
    pub session_cleanup_interval_seconds: u64,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_session_cleanup_interval() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            session_cleanup_interval_seconds: default_session_cleanup_interval(),
        }
    }
}

/// Platform identity service
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    /// Base URL; the token endpoint is `<endpoint>/oauth/token`
    #[serde(default = "default_platform_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_platform_client_id")]
    pub client_id: String,
    /// Usually supplied via TOKENBROKER_PLATFORM_CLIENT_SECRET
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub skip_tls_verification: bool,
    /// Scope conferring platform admin
    #[serde(default = "default_platform_admin_scope")]
    pub admin_scope: String,
}

fn default_platform_endpoint() -> String {
    "https://login.example.com".to_string()
}

fn default_platform_client_id() -> String {
    "console".to_string()
}

fn default_platform_admin_scope() -> String {
    "platform.admin".to_string()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            endpoint: default_platform_endpoint(),
            client_id: default_platform_client_id(),
            client_secret: String::new(),
            skip_tls_verification: false,
            admin_scope: default_platform_admin_scope(),
        }
    }
}

impl PlatformConfig {
    pub fn token_endpoint(&self) -> String {
        token_endpoint(&self.endpoint)
    }
}

/// Client ids used against connected services, one per target kind.
/// Target logins send no client secret.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetClientsConfig {
    #[serde(default = "default_cloud_controller_client")]
    pub cloud_controller: String,
    #[serde(default = "default_code_engine_client")]
    pub code_engine: String,
    #[serde(default = "default_service_manager_client")]
    pub service_manager: String,
    /// Scope conferring admin on cloud controller targets
    #[serde(default = "default_target_admin_scope")]
    pub admin_scope: String,
}

fn default_cloud_controller_client() -> String {
    "cf".to_string()
}

fn default_code_engine_client() -> String {
    "code-engine".to_string()
}

fn default_service_manager_client() -> String {
    "service-manager".to_string()
}

fn default_target_admin_scope() -> String {
    "cloud_controller.admin".to_string()
}

impl Default for TargetClientsConfig {
    fn default() -> Self {
        Self {
            cloud_controller: default_cloud_controller_client(),
            code_engine: default_code_engine_client(),
            service_manager: default_service_manager_client(),
            admin_scope: default_target_admin_scope(),
        }
    }
}

impl TargetClientsConfig {
    pub fn client_id(&self, kind: TargetKind) -> &str {
        match kind {
            TargetKind::CloudController => &self.cloud_controller,
            TargetKind::CodeEngine => &self.code_engine,
            TargetKind::ServiceManager => &self.service_manager,
        }
    }
}

/// Session cookie and sliding expiry
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Each successful write pushes expiry this far into the future
    #[serde(default = "default_sliding_window")]
    pub sliding_window_seconds: i64,
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
}

fn default_cookie_name() -> String {
    "tokenbroker_session".to_string()
}

fn default_sliding_window() -> i64 {
    20 * 60
}

fn default_secure_cookies() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            sliding_window_seconds: default_sliding_window(),
            secure_cookies: default_secure_cookies(),
        }
    }
}

/// Token and session database
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "tokenbroker.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Token endpoint HTTP client limits
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

/// Appends the OAuth token path to an authorization endpoint.
pub fn token_endpoint(authorization_endpoint: &str) -> String {
    format!("{}/oauth/token", authorization_endpoint.trim_end_matches('/'))
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<BrokerConfig> {
    use anyhow::Context;

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: BrokerConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path))?;
    Ok(config)
}

impl BrokerConfig {
    /// Applies environment overrides on top of file values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("TOKENBROKER_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = get("TOKENBROKER_DATABASE_PATH") {
            self.storage.database_path = v;
        }
        if let Some(v) = get("TOKENBROKER_PLATFORM_ENDPOINT") {
            self.platform.endpoint = v;
        }
        if let Some(v) = get("TOKENBROKER_PLATFORM_CLIENT_SECRET") {
            self.platform.client_secret = v;
        }
        if let Some(v) = get("TOKENBROKER_SECURE_COOKIES") {
            if let Ok(b) = v.parse::<bool>() {
                self.session.secure_cookies = b;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.server.bind_addr, "127.0.0.1:3000");
        assert_eq!(config.platform.admin_scope, "platform.admin");
        assert_eq!(config.clients.admin_scope, "cloud_controller.admin");
        assert_eq!(config.session.sliding_window_seconds, 1200);
        assert_eq!(config.transport.request_timeout_seconds, 30);
        assert!(config.targets.is_empty());
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            bind_addr = "0.0.0.0:8443"

            [platform]
            endpoint = "https://uaa.example.com/"
            client_id = "portal"
            skip_tls_verification = true

            [clients]
            cloud_controller = "cf-client"

            [session]
            cookie_name = "sid"
            sliding_window_seconds = 600

            [transport]
            request_timeout_seconds = 5

            [[targets]]
            guid = "svc-1"
            name = "Production CF"
            authorization_endpoint = "https://login.cf.example.com"
            api_endpoint = "https://api.cf.example.com"
            kind = "cloud_controller"
            skip_tls_verification = true

            [[targets]]
            guid = "svc-2"
            authorization_endpoint = "https://login.ce.example.com"
            api_endpoint = "https://api.ce.example.com"
            kind = "code_engine"
        "#;

        let config: BrokerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8443");
        assert_eq!(
            config.platform.token_endpoint(),
            "https://uaa.example.com/oauth/token"
        );
        assert!(config.platform.skip_tls_verification);
        assert_eq!(config.clients.client_id(TargetKind::CloudController), "cf-client");
        assert_eq!(config.clients.client_id(TargetKind::CodeEngine), "code-engine");
        assert_eq!(config.session.cookie_name, "sid");
        assert_eq!(config.transport.request_timeout_seconds, 5);
        assert_eq!(config.transport.connect_timeout_seconds, 10);

        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[0].kind, TargetKind::CloudController);
        assert!(config.targets[0].skip_tls_verification);
        assert_eq!(config.targets[1].kind, TargetKind::CodeEngine);
        assert!(!config.targets[1].skip_tls_verification);
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [session]
            secure_cookies = false
        "#;

        let config: BrokerConfig = toml::from_str(toml).unwrap();
        assert!(!config.session.secure_cookies);
        assert_eq!(config.session.cookie_name, "tokenbroker_session"); // Default
        assert_eq!(config.storage.database_path, "tokenbroker.db"); // Default
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TOKENBROKER_BIND_ADDR", "0.0.0.0:9000"),
            ("TOKENBROKER_PLATFORM_CLIENT_SECRET", "shh"),
            ("TOKENBROKER_SECURE_COOKIES", "false"),
        ]);

        let mut config = BrokerConfig::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.server.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.platform.client_secret, "shh");
        assert!(!config.session.secure_cookies);
        assert_eq!(config.storage.database_path, "tokenbroker.db");
    }

    #[test]
    fn test_token_endpoint_trims_trailing_slash() {
        assert_eq!(token_endpoint("https://a.example.com"), "https://a.example.com/oauth/token");
        assert_eq!(token_endpoint("https://a.example.com/"), "https://a.example.com/oauth/token");
    }
}
