//! Exact Online OAuth2 library
//!
//! Authorization URL construction, code exchange, token refresh, and the
//! token stores that hold the single process-wide `TokenSet`. No dependency
//! on the HTTP server; the refresh policy lives in `exact-tokens`.
//!
//! Token flow:
//! 1. Server redirects the operator to `OAuthClient::authorization_url()`
//! 2. Exact redirects back with a code; server calls `OAuthClient::exchange_code()`
//! 3. The resulting `TokenSet` is saved through a `TokenStore`
//! 4. When the token nears expiry, `OAuthClient::refresh()` replaces it

pub mod authorize;
pub mod constants;
pub mod error;
pub mod store;
pub mod token;

pub use authorize::generate_state;
pub use constants::*;
pub use error::{Error, Result};
pub use store::{FileTokenStore, MemoryTokenStore, TokenSet, TokenStore};
pub use token::{OAuthClient, TokenResponse, now_millis};
