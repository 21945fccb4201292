//! Handler for confirmation links.

use crate::{
    ConfirmHooks, ConfirmOutcome, EmailConfirm,
    backend::ConfirmBackend,
    error::ConfirmError,
    mailer::Mailer,
    request::ConfirmRequest,
};
use axum::{
    Json, Router,
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Route of the confirmation link, relative to the configured path prefix.
pub const CONFIRM_KEY_PATH: &str = "/key/{token}/";

/// Returns routes for the confirmation endpoint, mounted under `path_prefix`.
pub fn confirm_routes<B: ConfirmBackend, H: ConfirmHooks<B>, M: Mailer>(
    path_prefix: &str,
) -> Router<EmailConfirm<B, H, M>> {
    Router::new().route(
        &format!("{path_prefix}{CONFIRM_KEY_PATH}"),
        get(confirm_get::<B, H, M>),
    )
}

/// Default response for a followed confirmation link.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EmailConfirmResponse {
    /// Success message.
    pub message: String,
    /// The confirmed address.
    pub email: String,
}

/// Confirm the email address behind a token (`GET /key/{token}/`).
///
/// Following the link again after success is harmless and returns the same
/// response. An owner hook may replace the response, e.g. with a redirect.
#[utoipa::path(
    get,
    path = "/key/{token}/",
    params(("token" = String, Path, description = "Confirmation token from the email link")),
    responses(
        (status = OK, body = EmailConfirmResponse),
        (status = NOT_FOUND, body = crate::error::ConfirmErrorResponse),
        (status = GONE, body = crate::error::ConfirmErrorResponse),
        (status = INTERNAL_SERVER_ERROR, body = crate::error::ConfirmErrorResponse)
    ),
    tag = "email-confirm"
)]
pub async fn confirm_get<B: ConfirmBackend, H: ConfirmHooks<B>, M: Mailer>(
    State(confirm): State<EmailConfirm<B, H, M>>,
    Path(token): Path<String>,
    request: ConfirmRequest,
) -> Result<Response, ConfirmError> {
    let (confirmation, outcome) = confirm.confirm_token(&token, &request).await?;

    if let Some(response) = confirm.view(&confirmation, &request).await? {
        return Ok(response);
    }

    if let ConfirmOutcome::Response(response) = outcome {
        return Ok(response);
    }

    Ok(Json(EmailConfirmResponse {
        message: "Email confirmed successfully.".to_string(),
        email: confirmation.email,
    })
    .into_response())
}
