//! Envelope verification middleware
//!
//! Parses the five signature headers, looks up the claimed peer's token
//! and recomputes the HMAC over `METHOD ‖ PATH ‖ TIMESTAMP ‖ NONCE ‖ BODY`.
//! JSON bodies are buffered for verification and replayed into the
//! handler; streaming object uploads are verified with an empty body so
//! the payload is never held in memory.

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use sahab_cluster::envelope::Envelope;

use crate::routes::error_response;
use crate::server::AppState;

/// Bodies above this size cannot be buffered for signature verification.
const MAX_SIGNED_BODY: usize = 32 * 1024 * 1024;

fn is_streaming_object_upload(method: &Method, path: &str) -> bool {
    method == Method::PUT && path.starts_with("/api/internal/cluster/objects/")
}

pub async fn envelope_auth(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let envelope = match Envelope::from_headers(request.headers()) {
        Ok(envelope) => envelope,
        Err(e) => return error_response(StatusCode::UNAUTHORIZED, &e.to_string()),
    };

    // The stored token for the claimed node id is the verification key
    let node = match state.store.get_node(&envelope.node_id).await {
        Ok(Some(node)) => node,
        Ok(None) => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                &format!("unknown node: {}", envelope.node_id),
            )
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };

    if is_streaming_object_upload(&method, &path) {
        if envelope.verify(&node.token, method.as_str(), &path, b"").is_err() {
            return error_response(StatusCode::UNAUTHORIZED, "invalid request signature");
        }
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_SIGNED_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "unreadable request body"),
    };

    if envelope
        .verify(&node.token, method.as_str(), &path, &bytes)
        .is_err()
    {
        return error_response(StatusCode::UNAUTHORIZED, "invalid request signature");
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_exemption_scope() {
        assert!(is_streaming_object_upload(
            &Method::PUT,
            "/api/internal/cluster/objects/t1/b/k"
        ));
        assert!(!is_streaming_object_upload(
            &Method::DELETE,
            "/api/internal/cluster/objects/t1/b/k"
        ));
        assert!(!is_streaming_object_upload(
            &Method::PUT,
            "/api/internal/cluster/tenant-sync"
        ));
    }
}
