//! Access token lifecycle for the Exact Online API
//!
//! `TokenRefresher` hands out a valid access token on demand. Tokens are
//! checked against the safety margin on every call and refreshed inline when
//! stale; there is no background refresh task.
//!
//! Token lifecycle:
//! 1. Operator completes the OAuth code flow → `TokenRefresher::install()`
//! 2. Request needs upstream access → `TokenRefresher::access_token()`
//! 3. Token within the margin of expiry → one refresh, persisted to the store
//! 4. Refresh token rejected → every call fails until the operator re-authorizes

pub mod error;
pub mod refresher;

pub use error::{Error, Result};
pub use refresher::{DEFAULT_REFRESH_MARGIN, TokenRefresher};
