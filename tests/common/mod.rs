// Shared harness for the HTTP integration tests

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, Response},
    Router,
};
use axum_extra::extract::cookie::Key;
use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD},
    Engine,
};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::{json, Value};
use std::sync::Arc;
use tokenbroker::api::{create_router, AppState};
use tokenbroker::auth::{PlatformClient, SessionAuthenticator};
use tokenbroker::broker::{ConnectedServiceBroker, StaticTargetRegistry, TargetKind, TargetRecord};
use tokenbroker::config::{SessionConfig, TargetClientsConfig, TransportConfig};
use tokenbroker::session::SessionStore;
use tokenbroker::tokens::TokenStore;
use tokenbroker::transport::{ClientCredentials, TlsPolicy, TokenTransport};
use tower::ServiceExt;

pub const ADMIN_SCOPE: &str = "admin.scope";
pub const COOKIE_NAME: &str = "tokenbroker_session";
pub const TARGET_GUID: &str = "cf-1";
pub const PLATFORM_TOKEN_PATH: &str = "/oauth/token";
pub const TARGET_TOKEN_PATH: &str = "/target/oauth/token";

pub struct TestApp {
    pub router: Router,
    pub server: ServerGuard,
    pub tokens: Arc<TokenStore>,
}

impl TestApp {
    pub async fn new() -> Self {
        let server = Server::new_async().await;

        let tokens = Arc::new(TokenStore::new(":memory:", &BASE64.encode([0u8; 32])).unwrap());
        let sessions = Arc::new(SessionStore::new(":memory:", SessionConfig::default()).unwrap());
        let transport = Arc::new(TokenTransport::new(&TransportConfig::default()).unwrap());

        let platform = PlatformClient {
            token_endpoint: format!("{}{}", server.url(), PLATFORM_TOKEN_PATH),
            credentials: ClientCredentials::new("console", "secret"),
            tls: TlsPolicy::Verify,
            admin_scope: ADMIN_SCOPE.to_string(),
        };
        let registry = Arc::new(StaticTargetRegistry::new(vec![TargetRecord {
            guid: TARGET_GUID.to_string(),
            name: "Cloud Foundry".to_string(),
            authorization_endpoint: format!("{}/target", server.url()),
            api_endpoint: "https://api.cf.example.com".to_string(),
            kind: TargetKind::CloudController,
            skip_tls_verification: false,
        }]));

        let state = AppState {
            authenticator: Arc::new(SessionAuthenticator::new(
                transport.clone(),
                tokens.clone(),
                platform,
            )),
            broker: Arc::new(ConnectedServiceBroker::new(
                transport,
                tokens.clone(),
                registry,
                TargetClientsConfig::default(),
            )),
            sessions,
            cookie_key: Key::generate(),
        };

        Self {
            router: create_router(state).unwrap(),
            server,
            tokens,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Mocks a successful grant of `grant_type` at `path`.
    pub async fn mock_grant(&mut self, path: &str, grant_type: &str, body: String) -> mockito::Mock {
        self.server
            .mock("POST", path)
            .match_body(Matcher::UrlEncoded("grant_type".into(), grant_type.into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    /// Logs in through the API and returns the session cookie.
    pub async fn login(&mut self, user_id: &str, scopes: &[&str], exp: i64) -> String {
        let mock = self
            .mock_grant(
                PLATFORM_TOKEN_PATH,
                "password",
                token_body(&jwt(user_id, scopes, exp), "platform-refresh", ""),
            )
            .await;
        let response = self
            .send(form_post(
                "/auth/login",
                None,
                &[("username", user_id), ("password", "pw")],
            ))
            .await;
        mock.remove_async().await;

        assert_eq!(response.status(), 200);
        session_cookie(&response).expect("login sets a session cookie")
    }
}

pub fn jwt(user_id: &str, scopes: &[&str], exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        json!({
            "user_id": user_id,
            "user_name": user_id,
            "scope": scopes,
            "exp": exp,
        })
        .to_string(),
    );
    format!("{}.{}.signature", header, payload)
}

pub fn token_body(access_token: &str, refresh_token: &str, scope: &str) -> String {
    json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
        "token_type": "bearer",
        "expires_in": 600,
        "scope": scope,
        "jti": "test-jti",
    })
    .to_string()
}

pub fn form_post(uri: &str, cookie: Option<&str>, fields: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder
        .body(Body::from(serde_urlencoded::to_string(fields).unwrap()))
        .unwrap()
}

pub fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

/// `name=value` of the session cookie set by `response`, if any.
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter(|pair| pair.starts_with(&format!("{}=", COOKIE_NAME)))
        .last()
        .map(str::to_string)
}

pub fn expires_on_header(response: &Response<Body>) -> Option<i64> {
    response
        .headers()
        .get("x-session-expires-on")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

pub async fn json_body(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
