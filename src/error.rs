use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::mailer::MailError;

/// Email confirmation errors.
#[derive(Debug, Error)]
pub enum ConfirmError {
    /// No confirmation exists for the token.
    #[error("Confirmation not found")]
    NotFound,

    /// The confirmation window has closed, or the owner no longer exists.
    #[error("Confirmation expired")]
    Expired,

    /// A confirmation already exists for this owner, field and email.
    #[error("Confirmation already exists")]
    UniquenessViolation,

    #[error("Invalid email format")]
    InvalidEmail,

    #[error("mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Internal server error")]
    Internal(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl ConfirmError {
    /// Wrap a backend storage error.
    pub fn backend<E: std::error::Error>(error: E) -> Self {
        Self::Backend(error.to_string())
    }
}

/// JSON error body returned by the HTTP handlers.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConfirmErrorResponse {
    /// Human-readable error message.
    pub error: String,
}

impl IntoResponse for ConfirmError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ConfirmError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ConfirmError::Expired => (StatusCode::GONE, self.to_string()),
            ConfirmError::UniquenessViolation => (StatusCode::CONFLICT, self.to_string()),
            ConfirmError::InvalidEmail => (StatusCode::BAD_REQUEST, self.to_string()),
            ConfirmError::Mail(ref e) => {
                tracing::error!(error = %e, "Mail error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ConfirmError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ConfirmError::Backend(ref msg) => {
                tracing::error!("Backend error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ConfirmErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}
