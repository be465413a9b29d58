//! API routes

pub mod admin;
pub mod internal;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::Response;
use sahab_cluster::ClusterError;

/// JSON error body shared by every edge: `{error, message}`.
pub fn error_response(status: StatusCode, message: &str) -> Response {
    let error = match status.as_u16() {
        400 => "invalid_request",
        401 => "unauthorized",
        404 => "not_found",
        409 => "conflict",
        412 => "precondition_failed",
        429 => "rate_limited",
        503 => "unavailable",
        _ => "internal_error",
    };

    let body = serde_json::json!({
        "error": error,
        "message": message,
    });

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Error wrapper so handlers can use `?` on cluster results.
pub struct ApiError(pub ClusterError);

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        }
        error_response(status, &self.0.to_string())
    }
}

impl From<ClusterError> for ApiError {
    fn from(e: ClusterError) -> Self {
        ApiError(e)
    }
}

impl From<sahab_core::Error> for ApiError {
    fn from(e: sahab_core::Error) -> Self {
        ApiError(ClusterError::Metadata(e))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_shape() {
        let response = error_response(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
