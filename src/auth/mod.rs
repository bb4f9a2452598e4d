//! Platform session authentication.
//!
//! # Flow
//!
//! ```text
//! login(username, password)
//!   → password grant at the platform token endpoint
//!   → decode claims, store platform TokenRecord
//!   → replace session with {user_id, exp}
//!
//! verify()
//!   → read {user_id, exp} from session
//!   → exp still ahead:  slide session expiry
//!   → exp reached:      refresh grant (one per principal at a time),
//!                       store new record, update session
//!   → refresh rejected: clear session
//!
//! logout()
//!   → clear session (stored tokens stay)
//! ```

mod refresh;


pub use refresh::RefreshGuard;

use crate::config::PlatformConfig;
use crate::error::{BrokerError, Result};
use crate::session::{Session, TOKEN_EXPIRY, USER_ID};
use crate::tokens::{decode_claims, PrincipalTokenInfo, TokenRecord, TokenStore, TokenTarget};
use crate::transport::{ClientCredentials, Grant, TlsPolicy, TokenResponse, TokenTransport};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How the broker identifies itself to the platform identity service.
#[derive(Clone, Debug)]
pub struct PlatformClient {
    pub token_endpoint: String,
    pub credentials: ClientCredentials,
    pub tls: TlsPolicy,
    /// Scope whose presence marks a platform admin
    pub admin_scope: String,
}

impl PlatformClient {
    pub fn from_config(config: &PlatformConfig) -> Self {
        Self {
            token_endpoint: config.token_endpoint(),
            credentials: ClientCredentials::new(&config.client_id, &config.client_secret),
            tls: TlsPolicy::from_skip_flag(config.skip_tls_verification),
            admin_scope: config.admin_scope.clone(),
        }
    }
}

/// Runs after a successful platform login. Failures are logged, never
/// surfaced to the caller.
#[async_trait]
pub trait LoginHook: Send + Sync {
    async fn after_login(&self, user: &PrincipalTokenInfo) -> anyhow::Result<()>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoginOutcome {
    pub account: String,
    pub principal_id: String,
    /// Access token expiry (Unix seconds)
    pub token_expiry: i64,
    pub admin: bool,
    pub session_expires_on: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VerifyOutcome {
    pub account: String,
    pub admin: bool,
    /// True when verification had to run a refresh grant
    pub refreshed: bool,
    pub session_expires_on: i64,
}

/// Identity of a user as seen by the platform or a connected service.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConnectedUser {
    pub guid: String,
    pub name: String,
    pub admin: bool,
}

pub struct SessionAuthenticator {
    transport: Arc<TokenTransport>,
    tokens: Arc<TokenStore>,
    platform: PlatformClient,
    login_hook: Option<Arc<dyn LoginHook>>,
    refresh_guard: RefreshGuard,
}

impl SessionAuthenticator {
    pub fn new(
        transport: Arc<TokenTransport>,
        tokens: Arc<TokenStore>,
        platform: PlatformClient,
    ) -> Self {
        Self {
            transport,
            tokens,
            platform,
            login_hook: None,
            refresh_guard: RefreshGuard::new(),
        }
    }

    pub fn with_login_hook(mut self, hook: Arc<dyn LoginHook>) -> Self {
        self.login_hook = Some(hook);
        self
    }

    /// Password login against the platform.
    ///
    /// On success the platform record is stored and the request's session is
    /// replaced by a fresh one holding `user_id` and `exp`. Any failure leaves
    /// the incoming session and the stored tokens untouched.
    pub async fn login(
        &self,
        session: &mut Session,
        username: &str,
        password: &str,
    ) -> Result<LoginOutcome> {
        if username.is_empty() || password.is_empty() {
            return Err(BrokerError::MissingCredentials);
        }

        debug!(username = %username, "Platform login");
        let response = self
            .transport
            .exchange(
                &Grant::password(username, password),
                self.platform.tls,
                &self.platform.credentials,
                &self.platform.token_endpoint,
            )
            .await?;

        let user = decode_claims(&response.access_token)?;
        let record = TokenRecord {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            expires_at: user.token_expiry,
        };
        self.tokens
            .put(&user.principal_id, &TokenTarget::Platform, &record)?;

        session.reset();
        session.set_values([
            (USER_ID, json!(user.principal_id)),
            (TOKEN_EXPIRY, json!(user.token_expiry.timestamp())),
        ])?;
        let session_expires_on = session.expires_on()?;

        if let Some(hook) = &self.login_hook {
            if let Err(e) = hook.after_login(&user).await {
                warn!(principal = %user.principal_id, error = %e, "Post-login hook failed");
            }
        }

        let admin = self.is_admin(&user, Some(&response));
        info!(principal = %user.principal_id, admin, "Platform login successful");

        Ok(LoginOutcome {
            account: username.to_string(),
            principal_id: user.principal_id,
            token_expiry: user.token_expiry.timestamp(),
            admin,
            session_expires_on,
        })
    }

    /// Confirms the session is live, refreshing the platform token if its
    /// expiry has been reached.
    ///
    /// # Errors
    /// * [`BrokerError::SessionInvalid`] - no session, missing values, or no
    ///   usable platform record
    /// * [`BrokerError::RefreshFailed`] - refresh rejected; the session has
    ///   been cleared
    pub async fn verify(&self, session: &mut Session) -> Result<VerifyOutcome> {
        let token_expiry = session
            .i64_value(TOKEN_EXPIRY)
            .map_err(|e| BrokerError::SessionInvalid(e.to_string()))?;
        let principal_id = session
            .string_value(USER_ID)
            .map_err(|e| BrokerError::SessionInvalid(e.to_string()))?;

        let record = match self.tokens.get(&principal_id, &TokenTarget::Platform) {
            Ok(record) => record,
            Err(BrokerError::NotFound(what)) => return Err(BrokerError::SessionInvalid(what)),
            Err(e) => return Err(e),
        };
        let mut user = decode_claims(&record.access_token)
            .map_err(|e| BrokerError::SessionInvalid(e.to_string()))?;

        let refreshed = Utc::now().timestamp() >= token_expiry;
        if refreshed {
            debug!(principal = %principal_id, "Platform token expired, refreshing");
            match self.refresh(&principal_id).await {
                Ok(fresh) => {
                    session.set_values([
                        (USER_ID, json!(principal_id)),
                        (TOKEN_EXPIRY, json!(fresh.token_expiry.timestamp())),
                    ])?;
                    user = fresh;
                }
                Err(e) => {
                    warn!(principal = %principal_id, error = %e, "Token refresh failed, ending session");
                    if let Err(clear_err) = session.clear() {
                        warn!(error = %clear_err, "Failed to remove session");
                    }
                    return Err(BrokerError::RefreshFailed(e.to_string()));
                }
            }
        } else {
            session.touch()?;
        }

        Ok(VerifyOutcome {
            account: principal_id,
            admin: self.is_admin(&user, None),
            refreshed,
            session_expires_on: session.expires_on()?,
        })
    }

    /// Ends the session. Stored tokens are kept.
    pub fn logout(&self, session: &mut Session) -> Result<()> {
        if let Ok(principal_id) = session.string_value(USER_ID) {
            info!(principal = %principal_id, "Platform logout");
        }
        session.clear()
    }

    /// Platform identity of `principal_id`, from its stored access token.
    pub fn platform_user(&self, principal_id: &str) -> Result<ConnectedUser> {
        let record = self.tokens.get(principal_id, &TokenTarget::Platform)?;
        let user = decode_claims(&record.access_token)?;
        Ok(ConnectedUser {
            guid: user.principal_id.clone(),
            name: user.user_name.clone(),
            admin: self.is_admin(&user, None),
        })
    }

    fn is_admin(&self, user: &PrincipalTokenInfo, response: Option<&TokenResponse>) -> bool {
        user.has_scope(&self.platform.admin_scope)
            || response.is_some_and(|r| r.scopes().contains(&self.platform.admin_scope))
    }

    /// Runs the refresh grant for `principal_id` unless a concurrent caller
    /// already stored a token that is still valid.
    async fn refresh(&self, principal_id: &str) -> Result<PrincipalTokenInfo> {
        self.refresh_guard
            .run(principal_id, move || async move {
                let current = self.tokens.get(principal_id, &TokenTarget::Platform)?;
                if current.expires_at > Utc::now() {
                    debug!(principal = %principal_id, "Token already refreshed");
                    return decode_claims(&current.access_token);
                }

                let response = self
                    .transport
                    .exchange(
                        &Grant::refresh(&current.refresh_token),
                        self.platform.tls,
                        &self.platform.credentials,
                        &self.platform.token_endpoint,
                    )
                    .await?;

                let user = decode_claims(&response.access_token)?;
                // Providers may omit the refresh token when it is not rotated
                let refresh_token = if response.refresh_token.is_empty() {
                    current.refresh_token
                } else {
                    response.refresh_token
                };
                let record = TokenRecord {
                    access_token: response.access_token,
                    refresh_token,
                    expires_at: user.token_expiry,
                };
                self.tokens
                    .put(principal_id, &TokenTarget::Platform, &record)?;

                info!(principal = %principal_id, "Platform token refreshed");
                Ok(user)
            })
            .await
    }
}
