//! OAuth token exchange and refresh
//!
//! Both operations POST a form to the Exact token endpoint with different
//! grant types. Exact requires the client secret on every call, so the client
//! carries it for its whole lifetime.

use serde::{Deserialize, Deserializer, Serialize};

use common::Secret;

use crate::authorize::build_authorization_url;
use crate::constants::TOKEN_PATH;
use crate::error::{Error, Result};

/// Response from the token endpoint for both exchange and refresh.
///
/// Exact sends `expires_in` as a string (`"600"`); numbers are accepted too.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(deserialize_with = "seconds_from_number_or_string")]
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

fn seconds_from_number_or_string<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expires_in is not a number: {s:?}"))),
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Registered Exact Online app plus the HTTP client used to reach it.
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: Secret<String>,
    redirect_uri: String,
}

impl OAuthClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Secret<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            client_id: client_id.into(),
            client_secret,
            redirect_uri: redirect_uri.into(),
        }
    }

    /// Authorization URL carrying the given CSRF `state`.
    pub fn authorization_url(&self, state: &str) -> Result<String> {
        build_authorization_url(&self.base_url, &self.client_id, &self.redirect_uri, state)
    }

    fn token_endpoint(&self) -> String {
        format!("{}{}", self.base_url, TOKEN_PATH)
    }

    /// Exchange an authorization code for tokens (callback of the code flow).
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.token_endpoint())
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose().as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::TokenExchange(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
    }

    /// Trade a refresh token for a new token pair.
    ///
    /// Exact rotates refresh tokens: the returned `refresh_token` replaces the
    /// one sent, and the old one stops working.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.token_endpoint())
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose().as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));

            // 400/401 with invalid_grant means the refresh token is spent or revoked
            if status.as_u16() == 401 || body.contains("invalid_grant") {
                return Err(Error::InvalidCredentials(format!(
                    "token endpoint returned {status}: {body}"
                )));
            }

            return Err(Error::TokenExchange(format!(
                "token refresh returned {status}: {body}"
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))
    }
}
