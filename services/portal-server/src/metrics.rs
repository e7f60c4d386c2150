//! Prometheus metrics exposition
//!
//! - `portal_requests_total` (counter): labels `status`, `method`
//! - `portal_request_duration_seconds` (histogram): label `status`
//! - `portal_upstream_errors_total` (counter): label `operation`
//! - `portal_logins_total` (counter): label `outcome`, recorded by the login verifier
//! - `portal_token_refreshes_total` (counter): label `outcome`, recorded by the refresher

use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::{Instrument, info_span};

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("portal_request_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the global Prometheus recorder and return a handle for `/metrics`.
///
/// The duration metric gets explicit buckets so it renders as a histogram
/// (`_bucket` lines) rather than a summary.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a completed request with status code and HTTP method labels.
pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "portal_requests_total",
        "status" => status_str.clone(),
        "method" => method.to_string()
    )
    .increment(1);
    metrics::histogram!("portal_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

/// Record an upstream failure for the operation that hit it.
pub fn record_upstream_error(operation: &'static str) {
    metrics::counter!("portal_upstream_errors_total", "operation" => operation).increment(1);
}

/// Middleware: per-request span with a request id, plus request metrics.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let method = request.method().to_string();
    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %request.uri().path()
    );
    let start = Instant::now();

    let response = next.run(request).instrument(span).await;

    record_request(
        response.status().as_u16(),
        &method,
        start.elapsed().as_secs_f64(),
    );
    response
}
