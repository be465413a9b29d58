//! Authenticated transport for node-to-node communication
//!
//! Every outbound call is signed with the request envelope, wrapped
//! by the destination peer's circuit breaker, and recorded in the node
//! request metrics. JSON bodies are buffered so the signature is
//! reproducible; object bodies stream and sign an empty body.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use http::HeaderMap;
use reqwest::{Client, ClientBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use sahab_core::types::Node;
use sahab_crypto::generate_nonce;

use crate::breaker::BreakerRegistry;
use crate::envelope;
use crate::error::{ClusterError, ClusterResult};
use crate::metrics::ClusterMetrics;

/// The signing identity of the local node.
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    pub node_id: String,
    pub token: String,
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Default per-call timeout for sync pushes
    pub sync_timeout: Duration,
    /// Per-call timeout for aggregation fan-outs
    pub aggregate_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            sync_timeout: Duration::from_secs(30),
            aggregate_timeout: Duration::from_secs(5),
        }
    }
}

pub struct NodeClient {
    client: Client,
    config: TransportConfig,
    breakers: Arc<BreakerRegistry>,
    metrics: Arc<ClusterMetrics>,
}

impl NodeClient {
    pub fn new(
        config: TransportConfig,
        breakers: Arc<BreakerRegistry>,
        metrics: Arc<ClusterMetrics>,
    ) -> ClusterResult<Self> {
        // No global timeout: object copies are bounded by their own
        // operation context, not a per-request deadline.
        let client = ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ClusterError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            config,
            breakers,
            metrics,
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn signed_request(
        &self,
        identity: &RequestIdentity,
        method: reqwest::Method,
        node: &Node,
        path: &str,
        body: &[u8],
    ) -> reqwest::RequestBuilder {
        let timestamp = Utc::now().timestamp();
        let nonce = generate_nonce();
        let signature = envelope::sign(
            &identity.token,
            method.as_str(),
            path,
            timestamp,
            &nonce,
            body,
        );

        self.client
            .request(method, format!("{}{}", node.endpoint, path))
            .header(envelope::HEADER_NODE_ID, &identity.node_id)
            .header(envelope::HEADER_TIMESTAMP, timestamp.to_string())
            .header(envelope::HEADER_NONCE, nonce)
            .header(envelope::HEADER_SIGNATURE, signature)
    }

    async fn execute(
        &self,
        node: &Node,
        request: reqwest::RequestBuilder,
    ) -> ClusterResult<reqwest::Response> {
        let breaker = self.breakers.get(&node.id);
        let start = Instant::now();

        let result = breaker
            .call(|| async {
                let response = request
                    .send()
                    .await
                    .map_err(|e| ClusterError::Transport(e.to_string()))?;

                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(ClusterError::Transport(format!(
                        "Request to {} failed with status {}: {}",
                        node.id, status, body
                    )));
                }
                Ok(response)
            })
            .await;

        self.metrics
            .node_requests
            .record(result.is_ok(), start.elapsed());
        if matches!(&result, Err(ClusterError::CircuitOpen(_))) {
            self.metrics.record_circuit_open();
        }

        result
    }

    /// Signed GET returning a JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        identity: &RequestIdentity,
        node: &Node,
        path: &str,
        timeout: Duration,
    ) -> ClusterResult<T> {
        let request = self
            .signed_request(identity, reqwest::Method::GET, node, path, b"")
            .timeout(timeout);

        let response = self.execute(node, request).await?;
        response
            .json()
            .await
            .map_err(|e| ClusterError::Transport(e.to_string()))
    }

    /// Signed POST of a JSON body, returning the JSON response.
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        identity: &RequestIdentity,
        node: &Node,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> ClusterResult<T> {
        let payload = serde_json::to_vec(body)?;
        let request = self
            .signed_request(identity, reqwest::Method::POST, node, path, &payload)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .timeout(timeout);

        let response = self.execute(node, request).await?;
        response
            .json()
            .await
            .map_err(|e| ClusterError::Transport(e.to_string()))
    }

    /// Signed DELETE.
    pub async fn delete(
        &self,
        identity: &RequestIdentity,
        node: &Node,
        path: &str,
        timeout: Duration,
    ) -> ClusterResult<()> {
        let request = self
            .signed_request(identity, reqwest::Method::DELETE, node, path, b"")
            .timeout(timeout);
        self.execute(node, request).await?;
        Ok(())
    }

    /// Signed HEAD, returning the response headers.
    pub async fn head(
        &self,
        identity: &RequestIdentity,
        node: &Node,
        path: &str,
        timeout: Duration,
    ) -> ClusterResult<HeaderMap> {
        let request = self
            .signed_request(identity, reqwest::Method::HEAD, node, path, b"")
            .timeout(timeout);
        let response = self.execute(node, request).await?;
        Ok(response.headers().clone())
    }

    /// Signed streaming PUT of object bytes with metadata headers. The
    /// body is not buffered, so the signature covers the envelope fields
    /// with an empty body. Returns the destination's ETag when it reports
    /// one.
    pub async fn put_object(
        &self,
        identity: &RequestIdentity,
        node: &Node,
        path: &str,
        body: reqwest::Body,
        headers: Vec<(String, String)>,
    ) -> ClusterResult<Option<String>> {
        let mut request =
            self.signed_request(identity, reqwest::Method::PUT, node, path, b"");
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let request = request.body(body);

        let response = self.execute(node, request).await?;
        let etag = response
            .headers()
            .get(envelope::HEADER_OBJECT_ETAG)
            .or_else(|| response.headers().get(http::header::ETAG))
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim_matches('"').to_string());

        debug!(node = %node.id, path, "Object pushed");
        Ok(etag)
    }
}

impl std::fmt::Debug for NodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeClient")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_config_default() {
        let config = TransportConfig::default();
        assert_eq!(config.sync_timeout, Duration::from_secs(30));
        assert_eq!(config.aggregate_timeout, Duration::from_secs(5));
    }
}
