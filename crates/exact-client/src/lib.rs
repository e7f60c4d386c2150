//! Thin client for the Exact Online REST API
//!
//! Defines the `TokenSource` trait that decouples upstream calls from how the
//! access token is obtained, and `ExactClient`, which issues authenticated
//! division-scoped GETs and unwraps the OData `d` envelope.

pub mod client;
pub mod models;

pub use client::ExactClient;
pub use models::{Contact, ExtraField, odata_string};

use std::future::Future;
use std::pin::Pin;

/// Why a token could not be handed out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// No token was ever issued; an operator must authorize first
    #[error("no access token available")]
    Unavailable,

    /// A token exists but could not be made valid (refresh failed)
    #[error("access token unavailable: {0}")]
    Failed(String),
}

/// Errors from upstream API calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no access token available")]
    NoToken,

    #[error("access token error: {0}")]
    Token(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed upstream response: {0}")]
    Decode(String),
}

impl From<TokenError> for Error {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Unavailable => Error::NoToken,
            TokenError::Failed(msg) => Error::Token(msg),
        }
    }
}

/// Result alias for upstream operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Supplier of bearer tokens for upstream requests.
///
/// Uses `Pin<Box<dyn Future>>` for dyn-compatibility (`Arc<dyn TokenSource>`).
pub trait TokenSource: Send + Sync {
    fn access_token(
        &self,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<String, TokenError>> + Send + '_>>;
}
