//! Request-path error taxonomy
//!
//! Upstream details are logged where the error is raised and never reach the
//! client; each endpoint maps a `PortalError` to its own fixed message.

use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortalError {
    /// No upstream token was ever issued; an operator must authorize first
    #[error("no upstream access token available")]
    NoTokenAvailable,

    /// Network failure, non-2xx, malformed body, or a failed token refresh
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid session: {0}")]
    InvalidSession(String),

    #[error("session signing failed: {0}")]
    Signing(String),
}

impl From<exact_client::Error> for PortalError {
    fn from(e: exact_client::Error) -> Self {
        match e {
            exact_client::Error::NoToken => PortalError::NoTokenAvailable,
            other => PortalError::UpstreamUnavailable(other.to_string()),
        }
    }
}

impl From<exact_tokens::Error> for PortalError {
    fn from(e: exact_tokens::Error) -> Self {
        match e {
            exact_tokens::Error::NoTokenAvailable => PortalError::NoTokenAvailable,
            other => PortalError::UpstreamUnavailable(other.to_string()),
        }
    }
}

/// JSON response with an explicit status.
pub fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (status, [(CONTENT_TYPE, "application/json")], body.to_string()).into_response()
}
