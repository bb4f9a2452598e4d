//! Tokens for connected services, brokered on behalf of a logged-in
//! platform user.
//!
//! Each target login is a password grant against the target's own OAuth2
//! server. The resulting record is stored under the platform principal, so
//! one platform session carries credentials for any number of targets.

mod registry;


pub use registry::{StaticTargetRegistry, TargetKind, TargetRecord, TargetRegistry};

use crate::auth::ConnectedUser;
use crate::config::{token_endpoint, TargetClientsConfig};
use crate::error::{BrokerError, Result};
use crate::session::{Session, USER_ID};
use crate::tokens::{decode_claims, PrincipalTokenInfo, TokenRecord, TokenStore, TokenTarget};
use crate::transport::{ClientCredentials, Grant, TlsPolicy, TokenResponse, TokenTransport};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Post-login discovery of resources behind a target (e.g. the projects of a
/// code engine region). Failures never fail the login.
#[async_trait]
pub trait SubResourceDiscovery: Send + Sync {
    async fn discover(
        &self,
        principal_id: &str,
        target: &TargetRecord,
        access_token: &str,
    ) -> anyhow::Result<()>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct TargetLoginOutcome {
    /// Platform principal the target token is stored under
    pub account: String,
    /// Access token expiry (Unix seconds)
    pub token_expiry: i64,
    pub api_endpoint: String,
    pub admin: bool,
}

/// A target the principal holds a token for.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TargetConnection {
    pub guid: String,
    pub name: String,
    pub api_endpoint: String,
    /// `None` when the stored token carries no readable identity
    pub user: Option<ConnectedUser>,
}

pub struct ConnectedServiceBroker {
    transport: Arc<TokenTransport>,
    tokens: Arc<TokenStore>,
    registry: Arc<dyn TargetRegistry>,
    clients: TargetClientsConfig,
    discovery: Option<Arc<dyn SubResourceDiscovery>>,
}

impl ConnectedServiceBroker {
    pub fn new(
        transport: Arc<TokenTransport>,
        tokens: Arc<TokenStore>,
        registry: Arc<dyn TargetRegistry>,
        clients: TargetClientsConfig,
    ) -> Self {
        Self {
            transport,
            tokens,
            registry,
            clients,
            discovery: None,
        }
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn SubResourceDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Logs the session's platform user into `target_id` and stores the token.
    ///
    /// The session is checked before anything goes over the network.
    pub async fn login(
        &self,
        session: &Session,
        target_id: &str,
        username: &str,
        password: &str,
    ) -> Result<TargetLoginOutcome> {
        let principal_id = platform_principal(session)?;
        let target = self.resolve(target_id)?;
        if username.is_empty() || password.is_empty() {
            return Err(BrokerError::MissingCredentials);
        }

        debug!(principal = %principal_id, target = %target.guid, "Target login");
        let response = self.exchange(&target, username, password).await?;
        let user = decode_claims(&response.access_token)?;

        let record = TokenRecord {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: user.token_expiry,
        };
        self.tokens
            .put(&principal_id, &TokenTarget::service(&target.guid), &record)?;

        if target.kind == TargetKind::CodeEngine {
            if let Some(discovery) = &self.discovery {
                if let Err(e) = discovery
                    .discover(&principal_id, &target, &record.access_token)
                    .await
                {
                    warn!(target = %target.guid, error = %e, "Sub-resource discovery failed");
                }
            }
        }

        let admin = self.is_admin(&target, &user);
        info!(principal = %principal_id, target = %target.guid, admin, "Target login successful");

        Ok(TargetLoginOutcome {
            account: principal_id,
            token_expiry: user.token_expiry.timestamp(),
            api_endpoint: target.api_endpoint,
            admin,
        })
    }

    /// Checks the credentials against `target_id` without storing anything.
    ///
    /// Returns `Ok(false)` when the target's token endpoint refuses them.
    pub async fn verify_only(&self, target_id: &str, username: &str, password: &str) -> Result<bool> {
        let target = self.resolve(target_id)?;
        if username.is_empty() || password.is_empty() {
            return Err(BrokerError::MissingCredentials);
        }

        match self.exchange(&target, username, password).await {
            Ok(response) => Ok(decode_claims(&response.access_token).is_ok()),
            Err(e @ (BrokerError::Transport { .. } | BrokerError::Decode(_))) => {
                debug!(target = %target.guid, error = %e, "Target credentials rejected");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Forgets the token for `target_id`. Disconnecting an unconnected target
    /// succeeds.
    pub fn logout(&self, session: &Session, target_id: &str) -> Result<()> {
        let principal_id = platform_principal(session)?;
        if target_id.is_empty() {
            return Err(BrokerError::MissingTarget);
        }

        self.tokens
            .delete(&principal_id, &TokenTarget::service(target_id))?;
        info!(principal = %principal_id, target = %target_id, "Target logout");
        Ok(())
    }

    /// Identity the principal holds at `target_id`, if connected.
    pub fn connected_user(&self, principal_id: &str, target_id: &str) -> Result<Option<ConnectedUser>> {
        let target = self.resolve(target_id)?;
        let record = match self
            .tokens
            .get(principal_id, &TokenTarget::service(target_id))
        {
            Ok(record) => record,
            Err(BrokerError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let user = decode_claims(&record.access_token)?;
        Ok(Some(ConnectedUser {
            guid: user.principal_id.clone(),
            name: user.user_name.clone(),
            admin: self.is_admin(&target, &user),
        }))
    }

    /// Every registered target the principal holds a token for.
    pub fn connected_users(&self, principal_id: &str) -> Result<Vec<TargetConnection>> {
        let mut connections = Vec::new();

        for guid in self.tokens.list_targets(principal_id)? {
            let Some(target) = self.registry.find(&guid) else {
                debug!(target = %guid, "Skipping token for unregistered target");
                continue;
            };

            let user = match self.connected_user(principal_id, &guid) {
                Ok(user) => user,
                Err(BrokerError::MalformedToken(reason)) => {
                    warn!(target = %guid, reason = %reason, "Stored target token is unreadable");
                    None
                }
                Err(e) => return Err(e),
            };

            connections.push(TargetConnection {
                guid: target.guid,
                name: target.name,
                api_endpoint: target.api_endpoint,
                user,
            });
        }

        Ok(connections)
    }

    fn resolve(&self, target_id: &str) -> Result<TargetRecord> {
        if target_id.is_empty() {
            return Err(BrokerError::MissingTarget);
        }
        self.registry
            .find(target_id)
            .ok_or_else(|| BrokerError::UnknownTarget(target_id.to_string()))
    }

    async fn exchange(
        &self,
        target: &TargetRecord,
        username: &str,
        password: &str,
    ) -> Result<TokenResponse> {
        let credentials = ClientCredentials::public(self.clients.client_id(target.kind));
        self.transport
            .exchange(
                &Grant::password(username, password),
                TlsPolicy::from_skip_flag(target.skip_tls_verification),
                &credentials,
                &token_endpoint(&target.authorization_endpoint),
            )
            .await
    }

    fn is_admin(&self, target: &TargetRecord, user: &PrincipalTokenInfo) -> bool {
        target.kind == TargetKind::CloudController && user.has_scope(&self.clients.admin_scope)
    }
}

/// Principal id of the platform user behind `session`.
fn platform_principal(session: &Session) -> Result<String> {
    session
        .string_value(USER_ID)
        .map_err(|_| BrokerError::NoActiveSession)
}
