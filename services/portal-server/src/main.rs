//! Stock Portal Server
//!
//! Single-binary Rust service that:
//! 1. Holds the Exact Online OAuth tokens and refreshes them on demand
//! 2. Logs portal users in against Exact CRM contacts
//! 3. Serves the filtered stock position list to logged-in users

mod api;
mod config;
mod error;
mod login;
mod metrics;
mod oauth;
mod products;
mod session;
mod token_source;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::routing::get;
use exact_auth::{FileTokenStore, MemoryTokenStore, OAuthClient, TokenStore};
use exact_client::ExactClient;
use exact_tokens::TokenRefresher;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::{ApiState, build_api_router};
use crate::config::{Config, TokenBackend};
use crate::login::LoginVerifier;
use crate::oauth::{OAuthState, build_oauth_router};
use crate::products::ProductAdapter;
use crate::session::SessionKeys;
use crate::token_source::RefresherTokenSource;

/// Time allowed for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// State for the operational endpoints
#[derive(Clone)]
struct AppState {
    refresher: Arc<TokenRefresher>,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

/// Build the full router: API, OAuth flow, health and metrics.
///
/// CORS applies the configured origin list; the concurrency limit bounds
/// in-flight requests at `max_connections`.
fn build_router(
    app: AppState,
    api: ApiState,
    oauth: OAuthState,
    cors: CorsLayer,
    max_connections: usize,
) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(app)
        .merge(build_api_router(api))
        .merge(build_oauth_router(oauth))
        .layer(axum::middleware::from_fn(metrics::track_requests))
        .layer(cors)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
}

/// CORS layer allowing only the configured origins. Invalid entries are skipped.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ])
}

async fn open_token_store(config: &Config) -> Result<Arc<dyn TokenStore>> {
    let store: Arc<dyn TokenStore> = match config.tokens.backend {
        TokenBackend::File => Arc::new(FileTokenStore::open(config.tokens.path.clone()).await),
        TokenBackend::Env => Arc::new(
            MemoryTokenStore::from_env(&config.tokens.env_var)
                .with_context(|| format!("invalid token set in {}", config.tokens.env_var))?,
        ),
    };
    info!(backend = store.kind(), "token store ready");
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; real deployments set the environment directly
    dotenvy::dotenv().ok();

    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting stock-portal-server");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        base_url = %config.exact.base_url,
        division = config.exact.division,
        token_backend = ?config.tokens.backend,
        enrich = config.products.enrich,
        "configuration loaded"
    );

    let client_secret = config
        .exact
        .client_secret
        .clone()
        .context("CLIENT_SECRET not loaded")?;
    let jwt_secret = config
        .session
        .jwt_secret
        .clone()
        .context("JWT_SECRET not loaded")?;

    let http = reqwest::Client::new();

    let store = open_token_store(&config).await?;
    let oauth_client = OAuthClient::new(
        http.clone(),
        config.exact.base_url.clone(),
        config.exact.client_id.clone(),
        client_secret,
        config.exact.redirect_uri.clone(),
    );
    let refresher = Arc::new(TokenRefresher::new(
        store,
        oauth_client,
        Duration::from_secs(config.exact.refresh_margin_secs),
    ));
    if refresher.current().await.is_none() {
        warn!("no Exact tokens yet; authorize via /oauth/authorize");
    }

    let exact = ExactClient::new(
        http,
        config.exact.base_url.clone(),
        config.exact.division,
        Arc::new(RefresherTokenSource(refresher.clone())),
    );
    let sessions = Arc::new(SessionKeys::new(
        jwt_secret.expose().as_bytes(),
        Duration::from_secs(config.session.ttl_secs),
    ));

    let api_state = ApiState {
        login: Arc::new(LoginVerifier::new(
            exact.clone(),
            sessions.clone(),
            config.login.secret_field.clone(),
        )),
        products: Arc::new(ProductAdapter::new(exact, &config.products)),
        refresher: refresher.clone(),
        sessions,
    };
    let app_state = AppState {
        refresher: refresher.clone(),
        started_at: Instant::now(),
        prometheus: prometheus_handle,
    };

    let app = build_router(
        app_state,
        api_state,
        OAuthState::new(refresher),
        cors_layer(&config.server.allowed_origins),
        config.server.max_connections,
    );

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires: the server is
    // told to drain, then the drain races the timeout.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// Liveness: always 200, reports whether upstream tokens are present.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let tokens = if state.refresher.current().await.is_some() {
        "present"
    } else {
        "absent"
    };

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        serde_json::json!({
            "status": "ok",
            "token_store": state.refresher.store_kind(),
            "tokens": tokens,
            "uptime_seconds": state.started_at.elapsed().as_secs(),
        })
        .to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProductsConfig;
    use crate::test_support::{Route, exact_client, start_mock_exact};
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use exact_auth::TokenSet;
    use tower::ServiceExt;

    /// PrometheusHandle for tests without installing a global recorder.
    fn test_prometheus_handle() -> PrometheusHandle {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        recorder.handle()
    }

    fn test_refresher(initial: Option<TokenSet>) -> Arc<TokenRefresher> {
        let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new(initial));
        let oauth = OAuthClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            "client",
            common::Secret::new("secret".to_string()),
            "http://localhost/cb",
        );
        Arc::new(TokenRefresher::new(store, oauth, Duration::from_secs(60)))
    }

    async fn test_app(tokens: Option<TokenSet>) -> Router {
        let (base, _) = start_mock_exact(vec![Route::ok(
            "StockPositions",
            serde_json::json!({ "d": { "results": [] } }),
        )])
        .await;
        let client = exact_client(&base, Ok("at".into()));
        let sessions = Arc::new(SessionKeys::new(b"main-test", Duration::from_secs(60)));
        let refresher = test_refresher(tokens);
        let api = ApiState {
            login: Arc::new(LoginVerifier::new(
                client.clone(),
                sessions.clone(),
                "SocialSecurityNumber".into(),
            )),
            products: Arc::new(ProductAdapter::new(client, &ProductsConfig::default())),
            refresher: refresher.clone(),
            sessions,
        };
        let app = AppState {
            refresher: refresher.clone(),
            started_at: Instant::now(),
            prometheus: test_prometheus_handle(),
        };
        build_router(
            app,
            api,
            OAuthState::new(refresher),
            cors_layer(&crate::config::ServerConfig::default().allowed_origins),
            1000,
        )
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_reports_absent_tokens_with_200() {
        let response = test_app(None)
            .await
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["token_store"], "memory");
        assert_eq!(json["tokens"], "absent");
        assert!(json["uptime_seconds"].is_u64());
    }

    #[tokio::test]
    async fn health_reports_present_tokens() {
        let tokens = TokenSet {
            access_token: "at".into(),
            refresh_token: "rt".into(),
            expires_at: 0,
            token_type: None,
        };
        let response = test_app(Some(tokens))
            .await
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await["tokens"], "present");
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_format() {
        let response = test_app(None)
            .await
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; version=0.0.4; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn api_and_oauth_routes_are_mounted() {
        let app = test_app(None).await;

        let products = app
            .clone()
            .oneshot(Request::builder().uri("/api/products").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(products.status(), StatusCode::UNAUTHORIZED);

        let authorize = app
            .oneshot(Request::builder().uri("/oauth/authorize").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(authorize.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn cors_allows_configured_origin_only() {
        let app = test_app(None).await;

        let allowed = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "https://feitengacp.eu")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            allowed.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://feitengacp.eu"
        );

        let denied = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "https://evil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(
            denied
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .is_none()
        );
    }

    #[tokio::test]
    async fn cors_preflight_for_login_is_answered() {
        let response = test_app(None)
            .await
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/login")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_success());
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
    }

    #[test]
    fn invalid_cors_origins_are_skipped() {
        let _ = cors_layer(&["https://ok.example".into(), "bad\norigin".into()]);
    }

    fn config_with_tokens(tokens_section: &str) -> Config {
        toml::from_str(&format!(
            r#"
[exact]
division = 3555770
client_id = "c"
redirect_uri = "https://r"

{tokens_section}
"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn env_backend_opens_seeded_memory_store() {
        let key = "PORTAL_SERVER_TEST_ENV_BACKEND_TOKENS";
        let seeded = TokenSet {
            access_token: "at_env".into(),
            refresh_token: "rt_env".into(),
            expires_at: 42,
            token_type: None,
        };
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var(key, serde_json::to_string(&seeded).unwrap()) };
        let config = config_with_tokens(&format!(
            "[tokens]\nbackend = \"env\"\nenv_var = \"{key}\""
        ));

        let store = open_token_store(&config).await.unwrap();
        assert_eq!(store.kind(), "memory");
        assert_eq!(store.load().await, Some(seeded));
    }

    #[tokio::test]
    async fn env_backend_with_malformed_seed_fails_startup() {
        let key = "PORTAL_SERVER_TEST_ENV_BACKEND_MALFORMED";
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var(key, "not json") };
        let config = config_with_tokens(&format!(
            "[tokens]\nbackend = \"env\"\nenv_var = \"{key}\""
        ));

        let err = open_token_store(&config).await.err().unwrap();
        assert!(err.to_string().contains(key), "got: {err}");
    }

    #[tokio::test]
    async fn file_backend_opens_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let config = config_with_tokens(&format!(
            "[tokens]\nbackend = \"file\"\npath = {:?}",
            path.display().to_string()
        ));

        let store = open_token_store(&config).await.unwrap();
        assert_eq!(store.kind(), "file");
        assert!(store.load().await.is_none());
    }
}
