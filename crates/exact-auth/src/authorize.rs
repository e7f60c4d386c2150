//! Authorization redirect for the OAuth code flow
//!
//! Exact Online does not support PKCE, so the only binding between the
//! redirect and the callback is the opaque `state` value. The server keeps the
//! states it handed out and rejects callbacks carrying anything else.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;

use crate::constants::AUTHORIZE_PATH;
use crate::error::{Error, Result};

/// Generate a random `state` value for one authorization round trip.
///
/// 32 random bytes, URL-safe base64 without padding (43 characters).
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Build the authorization URL the operator's browser is redirected to.
///
/// `force_login=1` makes Exact show its login form even when a browser
/// session exists, so the operator picks the account that owns the division.
pub fn build_authorization_url(
    base_url: &str,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
) -> Result<String> {
    let endpoint = format!("{}{}", base_url.trim_end_matches('/'), AUTHORIZE_PATH);
    let url = reqwest::Url::parse_with_params(
        &endpoint,
        &[
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("force_login", "1"),
            ("state", state),
        ],
    )
    .map_err(|e| Error::Url(format!("{endpoint}: {e}")))?;
    Ok(url.into())
}
