//! Access-token claim decoding.
//!
//! The bearer token is a JWT issued by the identity provider. Only the payload
//! segment is read; the signature is not checked here because the token was
//! received directly from the provider's token endpoint.

use crate::error::{BrokerError, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;

/// Identity and privileges carried by an access token.
#[derive(Clone, Debug, PartialEq)]
pub struct PrincipalTokenInfo {
    pub principal_id: String,
    pub user_name: String,
    pub scopes: BTreeSet<String>,
    pub token_expiry: DateTime<Utc>,
}

impl PrincipalTokenInfo {
    /// Exact membership test; `"cloud_controller.admin"` does not match
    /// `"cloud_controller.admin_read_only"`.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

/// Providers emit `scope` either as a JSON array or a space-delimited string.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScopeClaim {
    List(Vec<String>),
    Delimited(String),
}

#[derive(Deserialize)]
struct Claims {
    user_id: Option<String>,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    scope: Option<ScopeClaim>,
    exp: Option<i64>,
}

/// Splits a space-delimited scope string into a set, dropping empty entries.
pub fn parse_scopes(scope: &str) -> BTreeSet<String> {
    scope.split_whitespace().map(str::to_string).collect()
}

/// Decodes the claims of `access_token`.
///
/// # Errors
/// [`BrokerError::MalformedToken`] if the token is not three dot-separated
/// segments, the payload is not base64url JSON, or `user_id`/`exp` are missing.
pub fn decode_claims(access_token: &str) -> Result<PrincipalTokenInfo> {
    let segments: Vec<&str> = access_token.split('.').collect();
    if segments.len() != 3 {
        return Err(BrokerError::MalformedToken(format!(
            "expected 3 segments, got {}",
            segments.len()
        )));
    }

    // Some issuers pad their segments
    let payload = URL_SAFE_NO_PAD
        .decode(segments[1].trim_end_matches('='))
        .map_err(|e| BrokerError::MalformedToken(format!("payload is not base64url: {}", e)))?;

    let claims: Claims = serde_json::from_slice(&payload)
        .map_err(|e| BrokerError::MalformedToken(format!("payload is not valid JSON: {}", e)))?;

    let principal_id = claims
        .user_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| BrokerError::MalformedToken("missing 'user_id' claim".to_string()))?;

    let exp = claims
        .exp
        .ok_or_else(|| BrokerError::MalformedToken("missing 'exp' claim".to_string()))?;
    let token_expiry = DateTime::<Utc>::from_timestamp(exp, 0)
        .ok_or_else(|| BrokerError::MalformedToken(format!("'exp' out of range: {}", exp)))?;

    let scopes = match claims.scope {
        Some(ScopeClaim::List(list)) => list.into_iter().filter(|s| !s.is_empty()).collect(),
        Some(ScopeClaim::Delimited(s)) => parse_scopes(&s),
        None => BTreeSet::new(),
    };

    Ok(PrincipalTokenInfo {
        principal_id,
        user_name: claims.user_name.unwrap_or_default(),
        scopes,
        token_expiry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn jwt(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{}.{}.signature", header, payload)
    }

    #[test]
    fn test_decode_full_claims() {
        let token = jwt(json!({
            "user_id": "8c1f-42",
            "user_name": "alice",
            "scope": ["openid", "platform.admin"],
            "exp": 1_900_000_000i64,
        }));

        let info = decode_claims(&token).unwrap();
        assert_eq!(info.principal_id, "8c1f-42");
        assert_eq!(info.user_name, "alice");
        assert!(info.has_scope("platform.admin"));
        assert!(info.has_scope("openid"));
        assert_eq!(info.token_expiry.timestamp(), 1_900_000_000);
    }

    #[test]
    fn test_scope_as_delimited_string() {
        let token = jwt(json!({
            "user_id": "u1",
            "scope": "openid  cloud_controller.read",
            "exp": 1_900_000_000i64,
        }));

        let info = decode_claims(&token).unwrap();
        assert_eq!(info.scopes.len(), 2);
        assert!(info.has_scope("cloud_controller.read"));
    }

    #[test]
    fn test_scope_match_is_exact() {
        let token = jwt(json!({
            "user_id": "u1",
            "scope": ["cloud_controller.admin_read_only"],
            "exp": 1_900_000_000i64,
        }));

        let info = decode_claims(&token).unwrap();
        assert!(!info.has_scope("cloud_controller.admin"));
    }

    #[test]
    fn test_padded_payload_accepted() {
        let header = URL_SAFE_NO_PAD.encode(b"{}");
        let mut payload =
            URL_SAFE_NO_PAD.encode(json!({"user_id": "u", "exp": 1_900_000_000i64}).to_string());
        while payload.len() % 4 != 0 {
            payload.push('=');
        }
        let token = format!("{}.{}.sig", header, payload);
        assert_eq!(decode_claims(&token).unwrap().principal_id, "u");
    }

    #[test]
    fn test_missing_required_claims() {
        let no_user = jwt(json!({"exp": 1_900_000_000i64}));
        assert!(matches!(decode_claims(&no_user), Err(BrokerError::MalformedToken(_))));

        let no_exp = jwt(json!({"user_id": "u1"}));
        assert!(matches!(decode_claims(&no_exp), Err(BrokerError::MalformedToken(_))));
    }

    #[test]
    fn test_garbage_tokens() {
        assert!(decode_claims("").is_err());
        assert!(decode_claims("opaque-token").is_err());
        assert!(decode_claims("a.%%%.c").is_err());
        let not_json = format!("a.{}.c", URL_SAFE_NO_PAD.encode(b"not json"));
        assert!(decode_claims(&not_json).is_err());
    }

    #[test]
    fn test_parse_scopes() {
        let scopes = parse_scopes(" openid platform.admin  openid ");
        assert_eq!(scopes.len(), 2);
        assert!(scopes.contains("platform.admin"));
        assert!(parse_scopes("").is_empty());
    }
}
