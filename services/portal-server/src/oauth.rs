//! Operator-facing OAuth code flow
//!
//! - GET /oauth/authorize: redirect to Exact with a fresh `state`
//! - GET /oauth/callback: check `state`, exchange the code, store the tokens

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use exact_tokens::TokenRefresher;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::json_response;

/// How long an issued `state` stays valid.
const STATE_EXPIRY: Duration = Duration::from_secs(600);

/// Upper bound on outstanding states; the oldest is evicted past this.
const MAX_PENDING_STATES: usize = 32;

const OAUTH_FAILED: &str = "OAuth failed. See server logs for details.";

#[derive(Clone)]
pub struct OAuthState {
    refresher: Arc<TokenRefresher>,
    pending: Arc<Mutex<HashMap<String, Instant>>>,
}

impl OAuthState {
    pub fn new(refresher: Arc<TokenRefresher>) -> Self {
        Self {
            refresher,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn remember(&self, state: String) {
        let mut pending = self.pending.lock().await;
        // Lazy cleanup while holding the lock
        pending.retain(|_, issued| issued.elapsed() < STATE_EXPIRY);
        if pending.len() >= MAX_PENDING_STATES {
            let oldest = pending
                .iter()
                .min_by_key(|(_, issued)| **issued)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                pending.remove(&oldest);
            }
        }
        pending.insert(state, Instant::now());
    }

    /// Consume a state value. Unknown and expired values are both rejected.
    async fn take(&self, state: &str) -> bool {
        let mut pending = self.pending.lock().await;
        matches!(pending.remove(state), Some(issued) if issued.elapsed() < STATE_EXPIRY)
    }
}

pub fn build_oauth_router(state: OAuthState) -> Router {
    Router::new()
        .route("/oauth/authorize", get(authorize))
        .route("/oauth/callback", get(callback))
        .with_state(state)
}

/// GET /oauth/authorize
async fn authorize(State(state): State<OAuthState>) -> Response {
    let csrf = exact_auth::generate_state();
    let url = match state.refresher.oauth().authorization_url(&csrf) {
        Ok(url) => url,
        Err(e) => {
            error!(error = %e, "cannot build authorization URL");
            return (StatusCode::INTERNAL_SERVER_ERROR, OAUTH_FAILED).into_response();
        }
    };
    state.remember(csrf).await;
    info!("redirecting operator to Exact authorization");
    Redirect::to(&url).into_response()
}

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
}

/// GET /oauth/callback
async fn callback(
    State(state): State<OAuthState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing authorization code").into_response();
    };

    let known = match params.state.as_deref() {
        Some(csrf) => state.take(csrf).await,
        None => false,
    };
    if !known {
        warn!("OAuth callback with unknown or expired state");
        return json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "Invalid or expired OAuth state." }),
        );
    }

    let response = match state.refresher.oauth().exchange_code(&code).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "authorization code exchange failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, OAUTH_FAILED).into_response();
        }
    };

    match state.refresher.install(response).await {
        Ok(tokens) => {
            info!(expires_at = tokens.expires_at, "Exact tokens installed");
            Json(tokens).into_response()
        }
        Err(e) => {
            error!(error = %e, "storing Exact tokens failed");
            (StatusCode::INTERNAL_SERVER_ERROR, OAUTH_FAILED).into_response()
        }
    }
}
