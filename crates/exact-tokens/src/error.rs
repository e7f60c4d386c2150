//! Error types for token lifecycle operations

/// Errors from obtaining an access token.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no upstream tokens available, authorization required")]
    NoTokenAvailable,

    #[error("refresh token rejected: {0}")]
    RefreshRejected(String),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("token store error: {0}")]
    Store(String),
}

/// Result alias for token lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;
