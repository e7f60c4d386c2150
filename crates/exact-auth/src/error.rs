//! Error types for OAuth and token store operations

/// Errors from OAuth and token store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("refresh token rejected: {0}")]
    InvalidCredentials(String),

    #[error("token parse error: {0}")]
    TokenParse(String),

    #[error("invalid URL: {0}")]
    Url(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
