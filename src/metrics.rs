//! Prometheus metrics for the blob portal.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides the HTTP RED middleware, and
//! exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

use crate::blobs::CopyOutcome;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "blob_portal_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "blob_portal_http_request_duration_seconds";

/// Completed copies and moves (counter). Labels: outcome.
pub const COPY_OUTCOMES_TOTAL: &str = "blob_portal_copy_outcomes_total";

/// Retried storage calls (counter). Labels: call.
pub const STORE_RETRIES_TOTAL: &str = "blob_portal_store_retries_total";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder and return its handle.
///
/// Calling it again after a successful install returns the same handle.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {}", e))?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(COPY_OUTCOMES_TOTAL, "Completed copies by strategy");
    describe_counter!(STORE_RETRIES_TOTAL, "Storage calls retried after a failed attempt");
}

/// Count one finished copy or move.
pub fn record_copy_outcome(outcome: CopyOutcome) {
    counter!(COPY_OUTCOMES_TOTAL, "outcome" => outcome.as_str()).increment(1);
}

/// Count one retried storage call.
pub fn record_store_retry(call: &str) {
    counter!(STORE_RETRIES_TOTAL, "call" => call.to_string()).increment(1);
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// `/metrics` itself is not instrumented.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = route_template(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path, "status" => status)
        .increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

/// Map a request path to its route template so blob keys never become
/// label values.
fn route_template(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/openapi.json" => "/openapi.json",
        "/blobs" | "/blobs/" => "/blobs",
        "/blobs/versions" => "/blobs/versions",
        p if p.starts_with("/blobs/") => "/blobs/{path}",
        _ => "other",
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Prometheus exposition text, or 503 when metrics are off.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics disabled").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_template_fixed_paths() {
        assert_eq!(route_template("/health"), "/health");
        assert_eq!(route_template("/openapi.json"), "/openapi.json");
        assert_eq!(route_template("/blobs"), "/blobs");
        assert_eq!(route_template("/blobs/versions"), "/blobs/versions");
    }

    #[test]
    fn test_route_template_hides_blob_keys() {
        assert_eq!(route_template("/blobs/a.txt"), "/blobs/{path}");
        assert_eq!(route_template("/blobs/deep/nested/key.bin"), "/blobs/{path}");
    }

    #[test]
    fn test_route_template_unknown() {
        assert_eq!(route_template("/"), "other");
        assert_eq!(route_template("/wp-admin"), "other");
    }
}
