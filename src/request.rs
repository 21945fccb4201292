//! Request context passed to confirmation hooks.

use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, Method, Uri, request::Parts};
use std::convert::Infallible;

/// The inbound request a confirmation attempt came from.
///
/// Hooks receive it so they can inspect headers (user agent, locale, ...)
/// or build redirects relative to the requested URI.
///
/// # Example
///
/// ```rust,ignore
/// use email_confirm::ConfirmRequest;
///
/// async fn handler(request: ConfirmRequest) {
///     let agent = request.headers.get("user-agent");
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfirmRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl<S> FromRequestParts<S> for ConfirmRequest
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
        })
    }
}
