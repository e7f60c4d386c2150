//! Exact Online OAuth endpoints
//!
//! Paths are relative to the regional base URL (`start.exactonline.nl` for
//! the Netherlands). The base is configurable so tests and other regions can
//! point elsewhere.

/// Default regional base URL
pub const DEFAULT_BASE_URL: &str = "https://start.exactonline.nl";

/// Authorization endpoint (browser redirect target)
pub const AUTHORIZE_PATH: &str = "/api/oauth2/auth";

/// Token endpoint for code exchange and token refresh
pub const TOKEN_PATH: &str = "/api/oauth2/token";
