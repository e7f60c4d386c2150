//! Session tokens issued to portal users
//!
//! Stateless HS256 JWTs carrying the contact identity. There is no server-side
//! revocation or rotation; a token is valid until `exp`.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PortalError, json_response};

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub iat: u64,
    pub exp: u64,
}

/// Identity attached to request extensions by `require_session`.
#[derive(Debug, Clone)]
pub struct SessionUser(pub SessionClaims);

/// Signing and verification keys plus the session lifetime.
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl SessionKeys {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    /// Sign a session token for a contact.
    pub fn issue(
        &self,
        id: &str,
        email: Option<&str>,
        name: Option<&str>,
    ) -> Result<String, PortalError> {
        let iat = unix_secs();
        let claims = SessionClaims {
            id: id.to_string(),
            email: email.map(str::to_string),
            name: name.map(str::to_string),
            iat,
            exp: iat.saturating_add(self.ttl.as_secs()),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| PortalError::Signing(e.to_string()))
    }

    /// Verify signature and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, PortalError> {
        decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| PortalError::InvalidSession(e.to_string()))
    }
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Axum middleware guarding session-protected routes.
///
/// Takes the second whitespace-separated part of `Authorization`. No header or
/// no second part: 401 with an empty body. Bad signature or expired: 403.
pub async fn require_session(
    State(keys): State<Arc<SessionKeys>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split_whitespace().nth(1))
        .map(str::to_owned);

    let Some(token) = token else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match keys.verify(&token) {
        Ok(claims) => {
            request.extensions_mut().insert(SessionUser(claims));
            next.run(request).await
        }
        Err(e) => {
            debug!(error = %e, "session rejected");
            json_response(
                StatusCode::FORBIDDEN,
                serde_json::json!({ "error": "Invalid or expired token." }),
            )
        }
    }
}
