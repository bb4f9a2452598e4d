//! HTTP error responses.

use crate::error::BrokerError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{debug, error};

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for auth endpoints
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    ServerError(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match self {
            AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::ServerError(msg) => msg,
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

/// Detailed errors are logged here; clients only see a short message.
impl From<BrokerError> for AppError {
    fn from(e: BrokerError) -> Self {
        if e.is_client_fault() {
            debug!(error = %e, "Request rejected");
        } else {
            error!(error = %e, "Request failed");
        }

        match e {
            BrokerError::MissingCredentials => {
                AppError::BadRequest("Username and password are required".to_string())
            }
            BrokerError::MissingTarget => {
                AppError::BadRequest("Missing target identifier".to_string())
            }
            BrokerError::UnknownTarget(_) => AppError::BadRequest("Unknown target".to_string()),
            BrokerError::Transport { .. } | BrokerError::MalformedToken(_) => {
                AppError::Unauthorized("Authentication failed".to_string())
            }
            BrokerError::NoActiveSession => {
                AppError::Unauthorized("No active session".to_string())
            }
            BrokerError::NotFound(_)
            | BrokerError::SessionInvalid(_)
            | BrokerError::SessionValueMissing(_) => {
                AppError::Forbidden("Session is not valid".to_string())
            }
            BrokerError::RefreshFailed(_) => {
                AppError::Forbidden("Session has expired".to_string())
            }
            BrokerError::Decode(_) | BrokerError::Storage(_) => {
                AppError::ServerError("Internal server error".to_string())
            }
        }
    }
}
