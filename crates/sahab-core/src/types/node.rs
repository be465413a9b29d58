//! Cluster node and health types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a cluster node
pub type NodeId = String;

/// Health of a peer as observed by the local prober
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unavailable,
    #[default]
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unavailable => "unavailable",
            HealthStatus::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "healthy" => HealthStatus::Healthy,
            "degraded" => HealthStatus::Degraded,
            "unavailable" => HealthStatus::Unavailable,
            _ => HealthStatus::Unknown,
        }
    }
}

/// A registered cluster peer.
///
/// The node token is the shared secret used to sign the request envelope;
/// it never leaves the node over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    /// Base URL other peers use to reach this node
    pub endpoint: String,
    #[serde(skip_serializing, default)]
    pub token: String,
    /// Scheduling priority; higher is preferred
    pub priority: i32,
    pub region: Option<String>,
    pub health_status: HealthStatus,
    pub last_health_check: Option<DateTime<Utc>>,
    pub latency_ms: Option<i64>,
    pub bucket_count: i64,
    pub storage_used_bytes: i64,
    pub storage_total_bytes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, token: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            endpoint: endpoint.into(),
            token,
            priority: 0,
            region: None,
            health_status: HealthStatus::Unknown,
            last_health_check: None,
            latency_ms: None,
            bucket_count: 0,
            storage_used_bytes: 0,
            storage_total_bytes: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health_status == HealthStatus::Healthy
    }
}

/// The singleton local cluster identity (`cluster_config`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    pub node_id: NodeId,
    pub node_name: String,
    #[serde(skip_serializing, default)]
    pub cluster_token: String,
    pub region: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One health probe observation (`cluster_health_history`, append-only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSample {
    pub id: i64,
    pub node_id: NodeId,
    pub status: HealthStatus,
    pub latency_ms: i64,
    pub timestamp: DateTime<Utc>,
    pub error_message: Option<String>,
}

/// Aggregate cluster view for operator dashboards.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClusterStatus {
    pub enabled: bool,
    pub local_node_id: NodeId,
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub degraded_nodes: usize,
    pub unavailable_nodes: usize,
    pub unknown_nodes: usize,
    pub nodes: Vec<Node>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_roundtrip() {
        for status in [
            HealthStatus::Healthy,
            HealthStatus::Degraded,
            HealthStatus::Unavailable,
            HealthStatus::Unknown,
        ] {
            assert_eq!(HealthStatus::parse(status.as_str()), status);
        }
        assert_eq!(HealthStatus::parse("garbage"), HealthStatus::Unknown);
    }

    #[test]
    fn test_node_token_not_serialized() {
        let node = Node::new("node-1", "http://node1:9400", "secret".to_string());
        let json = serde_json::to_string(&node).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("node-1"));
    }
}
