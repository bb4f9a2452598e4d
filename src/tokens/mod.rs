//! Token persistence and access-token claim decoding.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenStore                         │
//! │  - put / get / delete by                 │
//! │    (principal, TokenTarget)              │
//! └─────────────────────────────────────────┘
//!          ↓ seal              ↑ open
//! ┌─────────────────────────────────────────┐
//! │       TokenCipher (AES-256-GCM)          │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SQLite `tokens` table              │
//! └─────────────────────────────────────────┘
//! ```
//!
//! A principal owns at most one platform record and any number of service
//! records, one per target id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod codec;
mod encryption;
mod storage;

pub use codec::{decode_claims, parse_scopes, PrincipalTokenInfo};
pub use storage::TokenStore;

/// The persisted unit: bearer token, refresh token and absolute expiry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Which token slot of a principal a record belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TokenTarget {
    /// The platform identity service
    Platform,
    /// A registered connected service, by target id
    Service(String),
}

impl TokenTarget {
    pub fn service(target_id: impl Into<String>) -> Self {
        TokenTarget::Service(target_id.into())
    }

    /// `(token_type, target_id)` columns for this slot.
    fn key(&self) -> (&'static str, &str) {
        match self {
            TokenTarget::Platform => ("platform", ""),
            TokenTarget::Service(id) => ("service", id.as_str()),
        }
    }
}

impl fmt::Display for TokenTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenTarget::Platform => write!(f, "platform"),
            TokenTarget::Service(id) => write!(f, "service '{}'", id),
        }
    }
}
