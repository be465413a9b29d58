//! Authenticated request envelope
//!
//! Every internal peer call carries the caller's node id, a unix timestamp,
//! a random nonce and an HMAC-SHA256 signature over the exact concatenation
//! `METHOD ‖ PATH ‖ TIMESTAMP ‖ NONCE ‖ BODY`, keyed by the caller's node
//! token. Streaming object bodies are signed with an empty body; everything
//! else buffers the body before signing so the signature is reproducible.

use http::HeaderMap;
use sahab_crypto::hmac_sha256_hex;

use crate::error::{ClusterError, ClusterResult};

pub const HEADER_NODE_ID: &str = "X-Node-ID";
pub const HEADER_TIMESTAMP: &str = "X-Timestamp";
pub const HEADER_NONCE: &str = "X-Nonce";
pub const HEADER_SIGNATURE: &str = "X-Signature";

pub const HEADER_PROXIED: &str = "X-Proxied";
pub const HEADER_PROXY_NODE: &str = "X-Proxy-Node";

pub const HEADER_OBJECT_SIZE: &str = "X-Object-Size";
pub const HEADER_OBJECT_ETAG: &str = "X-Object-ETag";
pub const HEADER_OBJECT_METADATA: &str = "X-Object-Metadata";
pub const HEADER_SOURCE_VERSION_ID: &str = "X-Source-Version-ID";

/// Compute the signature for a request.
pub fn sign(
    token: &str,
    method: &str,
    path: &str,
    timestamp: i64,
    nonce: &str,
    body: &[u8],
) -> String {
    let mut message =
        Vec::with_capacity(method.len() + path.len() + nonce.len() + 24 + body.len());
    message.extend_from_slice(method.as_bytes());
    message.extend_from_slice(path.as_bytes());
    message.extend_from_slice(timestamp.to_string().as_bytes());
    message.extend_from_slice(nonce.as_bytes());
    message.extend_from_slice(body);
    hmac_sha256_hex(token.as_bytes(), &message)
}

/// The parsed envelope headers of an inbound request.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub node_id: String,
    pub timestamp: i64,
    pub nonce: String,
    pub signature: String,
}

impl Envelope {
    /// Extract the envelope from request headers. Any missing header is a
    /// 401-class rejection.
    pub fn from_headers(headers: &HeaderMap) -> ClusterResult<Self> {
        let get = |name: &'static str| -> ClusterResult<String> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
                .ok_or_else(|| ClusterError::MissingHeader(name.to_string()))
        };

        let timestamp = get(HEADER_TIMESTAMP)?
            .parse::<i64>()
            .map_err(|_| ClusterError::MissingHeader(HEADER_TIMESTAMP.to_string()))?;

        Ok(Self {
            node_id: get(HEADER_NODE_ID)?,
            timestamp,
            nonce: get(HEADER_NONCE)?,
            signature: get(HEADER_SIGNATURE)?,
        })
    }

    /// Recompute the signature with the stored token for the claimed node
    /// and compare. No freshness window or nonce cache is enforced; the
    /// timestamp and nonce are signed inputs only.
    pub fn verify(&self, token: &str, method: &str, path: &str, body: &[u8]) -> ClusterResult<()> {
        let expected = sign(token, method, path, self.timestamp, &self.nonce, body);
        if expected == self.signature {
            Ok(())
        } else {
            Err(ClusterError::InvalidSignature)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_signature_matches_manual_concatenation() {
        let body = br#"{"id":"t","name":"n"}"#;
        let sig = sign(
            "secret",
            "POST",
            "/api/internal/cluster/tenant-sync",
            1_700_000_000,
            "abc",
            body,
        );

        let mut manual = b"POST/api/internal/cluster/tenant-sync1700000000abc".to_vec();
        manual.extend_from_slice(body);
        assert_eq!(sig, hmac_sha256_hex(b"secret", &manual));
    }

    #[test]
    fn test_verify_accepts_and_rejects() {
        let body = br#"{"id":"t","name":"n"}"#;
        let path = "/api/internal/cluster/tenant-sync";
        let signature = sign("secret", "POST", path, 1_700_000_000, "abc", body);

        let envelope = Envelope {
            node_id: "n1".into(),
            timestamp: 1_700_000_000,
            nonce: "abc".into(),
            signature,
        };

        assert!(envelope.verify("secret", "POST", path, body).is_ok());

        // Altered body with the same signature is rejected
        let tampered = br#"{"id":"t","name":"evil"}"#;
        assert!(matches!(
            envelope.verify("secret", "POST", path, tampered),
            Err(ClusterError::InvalidSignature)
        ));

        // Wrong token is rejected
        assert!(envelope.verify("other", "POST", path, body).is_err());
    }

    #[test]
    fn test_from_headers_requires_all() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_NODE_ID, HeaderValue::from_static("n1"));
        headers.insert(HEADER_TIMESTAMP, HeaderValue::from_static("1700000000"));
        headers.insert(HEADER_NONCE, HeaderValue::from_static("abc"));

        // Signature missing
        assert!(matches!(
            Envelope::from_headers(&headers),
            Err(ClusterError::MissingHeader(_))
        ));

        headers.insert(HEADER_SIGNATURE, HeaderValue::from_static("deadbeef"));
        let envelope = Envelope::from_headers(&headers).unwrap();
        assert_eq!(envelope.node_id, "n1");
        assert_eq!(envelope.timestamp, 1_700_000_000);
        assert_eq!(envelope.nonce, "abc");
    }
}
