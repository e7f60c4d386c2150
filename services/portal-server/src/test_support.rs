//! Shared fixtures for server tests: a static token source and a mock Exact API.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use axum::extract::Query;
use axum::http::{StatusCode, Uri};
use exact_client::{ExactClient, TokenError, TokenSource};
use serde_json::Value;
use tokio::net::TcpListener;

pub const DIVISION: u64 = 3555770;

pub struct StaticToken(pub Result<String, TokenError>);

impl TokenSource for StaticToken {
    fn access_token(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<String, TokenError>> + Send + '_>> {
        let token = self.0.clone();
        Box::pin(async move { token })
    }
}

/// Canned upstream answer for every path ending in `suffix`.
#[derive(Clone)]
pub struct Route {
    pub suffix: &'static str,
    pub status: StatusCode,
    pub body: Value,
}

impl Route {
    pub fn ok(suffix: &'static str, body: Value) -> Self {
        Self {
            suffix,
            status: StatusCode::OK,
            body,
        }
    }
}

/// Requests seen by the mock: (path, decoded query).
pub type Hits = Arc<Mutex<Vec<(String, HashMap<String, String>)>>>;

/// Start a mock Exact API. Unmatched paths answer 404.
pub async fn start_mock_exact(routes: Vec<Route>) -> (String, Hits) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits: Hits = Arc::default();
    let sink = hits.clone();

    tokio::spawn(async move {
        let app = axum::Router::new().fallback(
            move |uri: Uri, Query(query): Query<HashMap<String, String>>| {
                let routes = routes.clone();
                let sink = sink.clone();
                async move {
                    let path = uri.path().to_string();
                    sink.lock().unwrap().push((path.clone(), query));
                    match routes.iter().find(|r| path.ends_with(r.suffix)) {
                        Some(route) => (route.status, axum::Json(route.body.clone())),
                        None => (
                            StatusCode::NOT_FOUND,
                            axum::Json(serde_json::json!({ "error": "no route" })),
                        ),
                    }
                }
            },
        );
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), hits)
}

pub fn exact_client(base_url: &str, token: Result<String, TokenError>) -> ExactClient {
    ExactClient::new(
        reqwest::Client::new(),
        base_url,
        DIVISION,
        Arc::new(StaticToken(token)),
    )
}
