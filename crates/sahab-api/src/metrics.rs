//! Prometheus metrics for the node API
//!
//! Exposes metrics at `/metrics` in Prometheus format.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;
use tracing::debug;

/// Metric names
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "sahab_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "sahab_http_request_duration_seconds";
    pub const UPTIME_SECONDS: &str = "sahab_uptime_seconds";
    pub const INFO: &str = "sahab_info";
}

/// Metrics recorder
#[derive(Clone)]
pub struct MetricsRecorder {
    handle: PrometheusHandle,
    start_time: Instant,
}

impl MetricsRecorder {
    /// Initialize the metrics system
    pub fn new() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus recorder");

        gauge!(names::INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);

        Self {
            handle,
            start_time: Instant::now(),
        }
    }

    /// Get metrics output in Prometheus format
    pub fn render(&self) -> String {
        gauge!(names::UPTIME_SECONDS).set(self.start_time.elapsed().as_secs_f64());
        self.handle.render()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Axum middleware for recording HTTP metrics
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16();

    counter!(
        names::HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "status_class" => format!("{}xx", status / 100)
    )
    .increment(1);
    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.clone()
    )
    .record(duration);

    debug!(
        method = %method,
        path = %path,
        status = %status,
        duration_ms = %(duration * 1000.0),
        "Request completed"
    );

    response
}

/// Handler for /metrics endpoint
pub async fn metrics_handler(State(state): State<crate::server::AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.recorder.render(),
    )
}
