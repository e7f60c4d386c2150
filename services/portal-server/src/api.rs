//! Portal API routes: login, product list, token check

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use exact_tokens::TokenRefresher;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::error::{PortalError, json_response};
use crate::login::LoginVerifier;
use crate::metrics;
use crate::products::ProductAdapter;
use crate::session::{SessionKeys, SessionUser, require_session};

/// Shared state for the portal API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub login: Arc<LoginVerifier>,
    pub products: Arc<ProductAdapter>,
    pub refresher: Arc<TokenRefresher>,
    pub sessions: Arc<SessionKeys>,
}

/// Build the API router. `/api/products` requires a session token.
pub fn build_api_router(state: ApiState) -> Router {
    let protected = Router::new()
        .route("/api/products", get(list_products))
        .route_layer(axum::middleware::from_fn_with_state(
            state.sessions.clone(),
            require_session,
        ));

    Router::new()
        .route("/api/login", post(login))
        .route("/api/test-token", get(test_token))
        .merge(protected)
        .with_state(state)
}

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

/// POST /api/login
///
/// A body that is not a JSON object (or lacks the JSON content type) gets a
/// 400 in the same `{message}` shape as every other login outcome.
async fn login(
    State(state): State<ApiState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            debug!(error = %rejection, "malformed login body");
            return json_response(
                StatusCode::BAD_REQUEST,
                json!({ "message": "Invalid login request." }),
            );
        }
    };
    match state.login.login(&body.email, &body.password).await {
        Ok(token) => json_response(
            StatusCode::OK,
            json!({ "message": "Login successful.", "token": token }),
        ),
        Err(PortalError::InvalidCredentials) => json_response(
            StatusCode::UNAUTHORIZED,
            json!({ "message": "Invalid credentials." }),
        ),
        Err(PortalError::NoTokenAvailable) => {
            error!("no Exact access token available for login check");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "message": "Server error: Cannot connect to Exact Online for login." }),
            )
        }
        Err(e) => {
            if matches!(e, PortalError::UpstreamUnavailable(_)) {
                metrics::record_upstream_error("login");
            }
            error!(error = %e, "login failed");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "message": "Server error during login process." }),
            )
        }
    }
}

/// GET /api/products
async fn list_products(
    State(state): State<ApiState>,
    Extension(user): Extension<SessionUser>,
) -> Response {
    debug!(contact_id = %user.0.id, "product list requested");
    match state.products.list_products().await {
        Ok(products) => Json(products).into_response(),
        Err(PortalError::NoTokenAvailable) => json_response(
            StatusCode::UNAUTHORIZED,
            json!({ "error": "Unauthorized - No valid access token" }),
        ),
        Err(e) => {
            metrics::record_upstream_error("products");
            error!(error = %e, "product list failed");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Server error contacting Exact" }),
            )
        }
    }
}

/// GET /api/test-token
async fn test_token(State(state): State<ApiState>) -> Response {
    match state.refresher.access_token().await {
        Ok(token) => json_response(
            StatusCode::OK,
            json!({ "message": "Access token retrieved successfully", "token": token }),
        ),
        Err(e) => {
            warn!(error = %e, "access token check failed");
            json_response(
                StatusCode::UNAUTHORIZED,
                json!({ "error": "Failed to retrieve access token" }),
            )
        }
    }
}
