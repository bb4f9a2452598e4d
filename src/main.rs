use anyhow::{Context, Result};
use axum_extra::extract::cookie::Key;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;
use tokenbroker::api::{create_router, AppState};
use tokenbroker::auth::{PlatformClient, SessionAuthenticator};
use tokenbroker::broker::{ConnectedServiceBroker, StaticTargetRegistry};
use tokenbroker::config::{load_config, BrokerConfig};
use tokenbroker::session::{run_session_cleanup, SessionStore};
use tokenbroker::tokens::TokenStore;
use tokenbroker::transport::TokenTransport;
use tracing::{info, warn};

/// Cookie key from `TOKENBROKER_COOKIE_KEY`, or a random one for this process.
fn cookie_key() -> Result<Key> {
    match std::env::var("TOKENBROKER_COOKIE_KEY") {
        Ok(encoded) => {
            let bytes = STANDARD
                .decode(encoded.trim())
                .context("TOKENBROKER_COOKIE_KEY must be base64")?;
            Key::try_from(bytes.as_slice())
                .context("TOKENBROKER_COOKIE_KEY must decode to at least 64 bytes")
        }
        Err(_) => {
            warn!("TOKENBROKER_COOKIE_KEY not set, generated a key; sessions will not survive a restart");
            Ok(Key::generate())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tokenbroker=info".into()),
        )
        .init();

    info!("Token broker starting...");

    let config_path =
        std::env::var("TOKENBROKER_CONFIG").unwrap_or_else(|_| "tokenbroker.toml".to_string());
    let mut config = if std::path::Path::new(&config_path).exists() {
        load_config(&config_path)?
    } else {
        warn!(path = %config_path, "Config file not found, using defaults");
        BrokerConfig::default()
    };
    config.apply_env();

    let encryption_key = std::env::var("TOKENBROKER_ENCRYPTION_KEY")
        .context("TOKENBROKER_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;
    let cookie_key = cookie_key()?;

    info!(
        bind_addr = %config.server.bind_addr,
        database = %config.storage.database_path,
        platform = %config.platform.endpoint,
        targets = config.targets.len(),
        "Configuration loaded"
    );

    let tokens = Arc::new(
        TokenStore::new(&config.storage.database_path, &encryption_key)
            .context("Failed to initialize token store")?,
    );
    let sessions = Arc::new(
        SessionStore::new(&config.storage.database_path, config.session.clone())
            .context("Failed to initialize session store")?,
    );
    let transport = Arc::new(TokenTransport::new(&config.transport)?);
    let registry = Arc::new(StaticTargetRegistry::new(config.targets.clone()));

    let authenticator = Arc::new(SessionAuthenticator::new(
        Arc::clone(&transport),
        Arc::clone(&tokens),
        PlatformClient::from_config(&config.platform),
    ));
    let broker = Arc::new(ConnectedServiceBroker::new(
        transport,
        tokens,
        registry,
        config.clients.clone(),
    ));

    tokio::spawn(run_session_cleanup(
        Arc::clone(&sessions),
        config.server.session_cleanup_interval_seconds,
    ));

    let router = create_router(AppState {
        authenticator,
        broker,
        sessions,
        cookie_key,
    })?;

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "Token broker listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for ctrl_c signal");
            }
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    Ok(())
}
