//! Reverse proxy to a bucket's home node
//!
//! Rewrites the client request URL onto the target peer, copies every
//! non-hop-by-hop header, adds the proxy advisory headers, signs the
//! envelope and hands the response headers and body back.

use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use http::{HeaderMap, Method};
use reqwest::{Client, ClientBuilder};
use tracing::debug;

use sahab_core::types::Node;
use sahab_crypto::generate_nonce;

use crate::envelope;
use crate::error::{ClusterError, ClusterResult};
use crate::transport::RequestIdentity;

/// Headers that belong to a single connection and must not be forwarded.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// A forwarded response, already stripped of hop-by-hop headers.
#[derive(Debug)]
pub struct ProxiedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

pub struct ReverseProxy {
    client: Client,
}

impl ReverseProxy {
    pub fn new(timeout: Duration) -> ClusterResult<Self> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClusterError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    /// Forward a client request to the bucket's home node. The body is
    /// buffered so the envelope signature covers it.
    pub async fn forward(
        &self,
        identity: &RequestIdentity,
        node: &Node,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> ClusterResult<ProxiedResponse> {
        let url = format!("{}{}", node.endpoint, path_and_query);
        let path = path_and_query
            .split('?')
            .next()
            .unwrap_or(path_and_query);

        let timestamp = Utc::now().timestamp();
        let nonce = generate_nonce();
        let signature = envelope::sign(
            &identity.token,
            method.as_str(),
            path,
            timestamp,
            &nonce,
            &body,
        );

        let mut request = self.client.request(method, &url);
        for (name, value) in headers {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            request = request.header(name, value);
        }
        request = request
            .header(envelope::HEADER_NODE_ID, &identity.node_id)
            .header(envelope::HEADER_TIMESTAMP, timestamp.to_string())
            .header(envelope::HEADER_NONCE, nonce)
            .header(envelope::HEADER_SIGNATURE, signature)
            .header(envelope::HEADER_PROXIED, "true")
            .header(envelope::HEADER_PROXY_NODE, &identity.node_id)
            .body(body);

        debug!(node = %node.id, url = %url, "Proxying request");
        let response = request
            .send()
            .await
            .map_err(|e| ClusterError::NodeUnreachable(e.to_string()))?;

        let status = response.status().as_u16();
        let response_headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| ClusterError::Transport(e.to_string()))?;

        Ok(ProxiedResponse {
            status,
            headers: response_headers,
            body,
        })
    }
}
