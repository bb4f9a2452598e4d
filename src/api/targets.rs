//! Connected-service endpoints. All take the target id as form field
//! `cnsi_guid`.

use super::{AppError, AppState};
use crate::error::BrokerError;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    Form,
};
use axum_extra::extract::PrivateCookieJar;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Form body for POST /auth/targets/login and /auth/targets/verify
#[derive(Deserialize)]
pub struct TargetLoginForm {
    #[serde(default)]
    pub cnsi_guid: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Form body for POST /auth/targets/logout
#[derive(Deserialize)]
pub struct TargetLogoutForm {
    #[serde(default)]
    pub cnsi_guid: String,
}

/// Response for POST /auth/targets/login
#[derive(Serialize, Debug, PartialEq)]
pub struct TargetLoginResponse {
    pub account: String,
    pub token_expiry: i64,
    pub api_endpoint: String,
    pub admin: bool,
}

/// POST /auth/targets/login - Connect the session's user to a target
pub async fn login(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Form(form): Form<TargetLoginForm>,
) -> Result<impl IntoResponse, (PrivateCookieJar, AppError)> {
    let session = state.load_session(jar)?;

    match state
        .broker
        .login(&session, &form.cnsi_guid, &form.username, &form.password)
        .await
    {
        Ok(outcome) => Ok((
            session.into_jar(),
            Json(TargetLoginResponse {
                account: outcome.account,
                token_expiry: outcome.token_expiry,
                api_endpoint: outcome.api_endpoint,
                admin: outcome.admin,
            }),
        )),
        Err(e) => Err((session.into_jar(), e.into())),
    }
}

/// POST /auth/targets/verify - Check target credentials without connecting
///
/// Any failure to authenticate is a 401, an unregistered target included.
pub async fn verify_only(
    State(state): State<AppState>,
    Form(form): Form<TargetLoginForm>,
) -> Result<StatusCode, AppError> {
    let accepted = match state
        .broker
        .verify_only(&form.cnsi_guid, &form.username, &form.password)
        .await
    {
        Ok(accepted) => accepted,
        Err(BrokerError::UnknownTarget(guid)) => {
            debug!(target = %guid, "Verify against unregistered target");
            false
        }
        Err(e) => return Err(e.into()),
    };

    if accepted {
        Ok(StatusCode::OK)
    } else {
        debug!(target = %form.cnsi_guid, "Target credentials not accepted");
        Err(AppError::Unauthorized("Authentication failed".to_string()))
    }
}

/// POST /auth/targets/logout - Disconnect the session's user from a target
pub async fn logout(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Form(form): Form<TargetLogoutForm>,
) -> Result<impl IntoResponse, (PrivateCookieJar, AppError)> {
    let session = state.load_session(jar)?;

    match state.broker.logout(&session, &form.cnsi_guid) {
        Ok(()) => Ok((session.into_jar(), StatusCode::OK)),
        Err(e) => Err((session.into_jar(), e.into())),
    }
}
