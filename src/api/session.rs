//! Platform session endpoints.

use super::{expiry_header, AppError, AppState};
use crate::auth::ConnectedUser;
use crate::broker::TargetConnection;
use crate::error::BrokerError;
use crate::session::USER_ID;
use axum::{
    extract::State,
    response::{IntoResponse, Json},
    Form,
};
use axum_extra::extract::PrivateCookieJar;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Form body for POST /auth/login
#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Response for POST /auth/login
#[derive(Serialize, Debug, PartialEq)]
pub struct LoginResponse {
    pub account: String,
    pub token_expiry: i64,
    pub admin: bool,
}

/// Response for GET /auth/session/verify
#[derive(Serialize, Debug, PartialEq)]
pub struct VerifyResponse {
    pub account: String,
    pub admin: bool,
}

/// Response for GET /auth/session/users
#[derive(Serialize)]
pub struct ConnectedUsersResponse {
    pub platform: ConnectedUser,
    pub targets: Vec<TargetConnection>,
}

/// POST /auth/login - Password login against the platform
///
/// Starts a new session; any session the request carried is discarded.
pub async fn login(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Form(form): Form<LoginForm>,
) -> Result<impl IntoResponse, (PrivateCookieJar, AppError)> {
    let mut session = state.load_session(jar)?;

    match state
        .authenticator
        .login(&mut session, &form.username, &form.password)
        .await
    {
        Ok(outcome) => Ok((
            session.into_jar(),
            expiry_header(outcome.session_expires_on),
            Json(LoginResponse {
                account: outcome.account,
                token_expiry: outcome.token_expiry,
                admin: outcome.admin,
            }),
        )),
        Err(e) => Err((session.into_jar(), e.into())),
    }
}

/// GET /auth/session/verify - Confirm the session, refreshing the platform
/// token if it has expired
pub async fn verify(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<impl IntoResponse, (PrivateCookieJar, AppError)> {
    let mut session = state.load_session(jar)?;

    match state.authenticator.verify(&mut session).await {
        Ok(outcome) => Ok((
            session.into_jar(),
            expiry_header(outcome.session_expires_on),
            Json(VerifyResponse {
                account: outcome.account,
                admin: outcome.admin,
            }),
        )),
        // A failed refresh has cleared the session; the jar carries the removal
        Err(e) => Err((session.into_jar(), e.into())),
    }
}

/// POST /auth/logout - End the session
///
/// Always succeeds from the client's point of view.
pub async fn logout(State(state): State<AppState>, jar: PrivateCookieJar) -> impl IntoResponse {
    let mut session = match state.load_session(jar) {
        Ok(session) => session,
        Err((jar, e)) => {
            warn!(error = ?e, "Failed to load session on logout");
            return jar;
        }
    };

    if let Err(e) = state.authenticator.logout(&mut session) {
        warn!(error = %e, "Failed to remove session");
    }
    session.into_jar()
}

/// GET /auth/session/users - Platform identity and every connected target
pub async fn connected_users(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<impl IntoResponse, (PrivateCookieJar, AppError)> {
    let session = state.load_session(jar)?;

    let result = session
        .string_value(USER_ID)
        .map_err(|e| BrokerError::SessionInvalid(e.to_string()))
        .and_then(|principal_id| {
            Ok(ConnectedUsersResponse {
                platform: state.authenticator.platform_user(&principal_id)?,
                targets: state.broker.connected_users(&principal_id)?,
            })
        });

    match result {
        Ok(response) => Ok((session.into_jar(), Json(response))),
        Err(e) => Err((session.into_jar(), e.into())),
    }
}
