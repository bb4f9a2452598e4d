//! Error taxonomy shared by the transport, stores, authenticator and broker.
//!
//! Components return [`BrokerError`]; the HTTP layer maps each variant to a
//! status code and a short message (see `api::error`). Storage internals use
//! `anyhow` with context and surface here as [`BrokerError::Storage`].

use thiserror::Error;

pub type Result<T, E = BrokerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Username or password absent/empty on a login form
    #[error("username and password are required")]
    MissingCredentials,

    /// No `cnsi_guid` supplied on a target operation
    #[error("target identifier is required")]
    MissingTarget,

    /// The target id is not present in the registry
    #[error("no target registered with id '{0}'")]
    UnknownTarget(String),

    /// Network failure (no status) or a non-200 answer from a token endpoint
    #[error("token endpoint request failed (status {status:?}): {body}")]
    Transport { status: Option<u16>, body: String },

    /// Token endpoint answered 200 with a body that is not a token response
    #[error("failed to decode token response: {0}")]
    Decode(String),

    /// Access token could not be parsed or lacks required claims
    #[error("malformed access token: {0}")]
    MalformedToken(String),

    /// No stored token record for the requested (principal, target)
    #[error("{0} not found")]
    NotFound(String),

    /// A target operation was attempted without an established platform session
    #[error("no active platform session")]
    NoActiveSession,

    /// Session verification could not establish who the caller is
    #[error("session is invalid: {0}")]
    SessionInvalid(String),

    /// A typed session accessor found no value for the key
    #[error("session value '{0}' is missing")]
    SessionValueMissing(String),

    /// Refresh grant failed; the session has been cleared
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// Persistence failure in the token or session store
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl BrokerError {
    pub fn transport(status: Option<u16>, body: impl Into<String>) -> Self {
        BrokerError::Transport {
            status,
            body: body.into(),
        }
    }

    /// True for failures caused by what the caller sent (credentials, input),
    /// as opposed to faults inside the broker.
    pub fn is_client_fault(&self) -> bool {
        !matches!(self, BrokerError::Decode(_) | BrokerError::Storage(_))
    }
}
