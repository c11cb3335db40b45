//! Gateway errors and their HTTP mapping.
//!
//! | error                               | response                     |
//! |-------------------------------------|------------------------------|
//! | `AuthRequired`, `SignatureInvalid`  | 302 to the authorize endpoint |
//! | `MissingAttribute`                  | 403                          |
//! | `BadCallback`, `BadRequest`         | 400                          |
//! | `PayloadTooLarge`                   | 413                          |
//! | `UpstreamUnavailable`, `TokenExchange` | 502                       |
//! | `ConfigInvalid`, `NotFound`         | 503                          |
//!
//! Bodies carry the status reason only; details go to the log.

use axum::http::header::{CACHE_CONTROL, LOCATION, SET_COOKIE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::auth::{OAuth2Error, SessionError};
use crate::provider::ResolveError;
use crate::upstream::ForwardError;

/// Where to send a browser that has to log in, and the cookies to set.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    pub location: String,
    pub cookies: Vec<String>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication required")]
    AuthRequired(LoginRedirect),

    #[error("session signature invalid")]
    SignatureInvalid(LoginRedirect),

    #[error("session lacks attribute `{0}`")]
    MissingAttribute(String),

    #[error("bad login callback: {0}")]
    BadCallback(String),

    #[error("request body too large")]
    PayloadTooLarge,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("code exchange failed: {0}")]
    TokenExchange(String),

    #[error("provider configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("provider not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::AuthRequired(_) | GatewayError::SignatureInvalid(_) => StatusCode::FOUND,
            GatewayError::MissingAttribute(_) => StatusCode::FORBIDDEN,
            GatewayError::BadCallback(_) | GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::UpstreamUnavailable(_) | GatewayError::TokenExchange(_) => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::ConfigInvalid(_) | GatewayError::NotFound(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A 302 to `location` setting `cookies`. Never cached.
pub fn redirect(location: &str, cookies: &[String]) -> Response {
    let mut response = StatusCode::FOUND.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(location) {
        headers.insert(LOCATION, value);
    }
    for cookie in cookies {
        if let Ok(value) = HeaderValue::from_str(cookie) {
            headers.append(SET_COOKIE, value);
        }
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            GatewayError::AuthRequired(login) | GatewayError::SignatureInvalid(login) => {
                redirect(&login.location, &login.cookies)
            }
            other => {
                if status.is_server_error() {
                    tracing::error!(status = %status, error = %other, "Request failed");
                } else {
                    tracing::warn!(status = %status, error = %other, "Request rejected");
                }
                let reason = status.canonical_reason().unwrap_or("Error");
                (status, reason).into_response()
            }
        }
    }
}

impl From<ForwardError> for GatewayError {
    fn from(e: ForwardError) -> Self {
        match e {
            ForwardError::MissingAttribute(name) => GatewayError::MissingAttribute(name),
            ForwardError::TooLarge { .. } => GatewayError::PayloadTooLarge,
            e @ ForwardError::Body(_) => GatewayError::BadRequest(e.to_string()),
            ForwardError::Certificate(e) => GatewayError::ConfigInvalid(e.to_string()),
            e @ (ForwardError::Unavailable { .. } | ForwardError::Client(_)) => {
                GatewayError::UpstreamUnavailable(e.to_string())
            }
        }
    }
}

impl From<ResolveError> for GatewayError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::NotFound(id) => GatewayError::NotFound(id),
            e @ ResolveError::Invalid { .. } => GatewayError::ConfigInvalid(e.to_string()),
        }
    }
}

impl From<OAuth2Error> for GatewayError {
    fn from(e: OAuth2Error) -> Self {
        GatewayError::TokenExchange(e.to_string())
    }
}

impl From<SessionError> for GatewayError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::BadCallback(reason) => GatewayError::BadCallback(reason.to_string()),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}
