//! HTTP surface: platform session routes and connected-service routes.
//!
//! | Route | Handler |
//! |---|---|
//! | `POST /auth/login` | [`session::login`] |
//! | `POST /auth/logout` | [`session::logout`] |
//! | `GET /auth/session/verify` | [`session::verify`] |
//! | `GET /auth/session/users` | [`session::connected_users`] |
//! | `POST /auth/targets/login` | [`targets::login`] |
//! | `POST /auth/targets/verify` | [`targets::verify_only`] |
//! | `POST /auth/targets/logout` | [`targets::logout`] |

mod error;
pub mod session;
pub mod targets;

pub use error::AppError;

use crate::auth::SessionAuthenticator;
use crate::broker::ConnectedServiceBroker;
use crate::session::{strip_empty_session_cookie, EmptyCookieFilter, Session, SessionStore};
use axum::{
    extract::FromRef,
    middleware,
    routing::{get, post},
    Router,
};
use axum_extra::extract::{cookie::Key, PrivateCookieJar};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Response header carrying the absolute session expiry (Unix seconds)
pub const SESSION_EXPIRES_ON_HEADER: &str = "X-Session-Expires-On";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<SessionAuthenticator>,
    pub broker: Arc<ConnectedServiceBroker>,
    pub sessions: Arc<SessionStore>,
    pub cookie_key: Key,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

impl AppState {
    /// Resolves the request's session. On failure the jar is handed back so
    /// the error response still carries it.
    fn load_session(&self, jar: PrivateCookieJar) -> Result<Session, (PrivateCookieJar, AppError)> {
        Session::load(self.sessions.clone(), jar.clone()).map_err(|e| (jar, AppError::from(e)))
    }
}

fn expiry_header(expires_on: i64) -> [(&'static str, String); 1] {
    [(SESSION_EXPIRES_ON_HEADER, expires_on.to_string())]
}

/// Create the auth router
pub fn create_router(state: AppState) -> anyhow::Result<Router> {
    let cookie_name = state.sessions.cookie_name().to_string();

    let router = Router::new()
        .route("/auth/login", post(session::login))
        .route("/auth/logout", post(session::logout))
        .route("/auth/session/verify", get(session::verify))
        .route("/auth/session/users", get(session::connected_users))
        .route("/auth/targets/login", post(targets::login))
        .route("/auth/targets/verify", post(targets::verify_only))
        .route("/auth/targets/logout", post(targets::logout));

    Ok(with_request_layers(router, &cookie_name)?.with_state(state))
}

/// Layers shared by every route: cookie header clean-up, then tracing.
fn with_request_layers<S>(router: Router<S>, cookie_name: &str) -> anyhow::Result<Router<S>>
where
    S: Clone + Send + Sync + 'static,
{
    let filter = EmptyCookieFilter::new(cookie_name)?;
    Ok(router
        .layer(middleware::from_fn_with_state(
            filter,
            strip_empty_session_cookie,
        ))
        .layer(TraceLayer::new_for_http()))
}
