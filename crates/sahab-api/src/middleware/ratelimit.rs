//! Per-IP rate limiting middleware
//!
//! Token bucket keyed by the remote address; denial answers 429 with a
//! JSON `{error}` body.

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::routes::error_response;
use crate::server::AppState;

pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let allowed = state.limiter.allow(&client_ip);
    state.cluster_metrics.record_rate_limit(allowed);

    if !allowed {
        return error_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
    }

    next.run(request).await
}
