//! Cluster manager - local identity and peer registry
//!
//! Responsibilities:
//! - Persist the cluster config singleton and the peer list
//! - Run the health probe loop and record samples
//! - Expose the healthy-peer view consumed by every other engine

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use sahab_core::types::{ClusterStatus, HealthStatus, LocalConfig, Node};
use sahab_core::config::ClusterSection;
use sahab_crypto::generate_token;
use sahab_metadata::ClusterStore;
use uuid::Uuid;

use crate::breaker::BreakerRegistry;
use crate::error::{ClusterError, ClusterResult};
use crate::transport::{NodeClient, RequestIdentity};

/// The minimal capability surface the sync engines, aggregators and
/// pipelines need from the manager. Tests pass a stub.
#[async_trait]
pub trait ClusterView: Send + Sync {
    /// Peers (excluding the local node) whose last observed health is
    /// healthy.
    async fn healthy_nodes(&self) -> ClusterResult<Vec<Node>>;

    async fn local_node_id(&self) -> ClusterResult<String>;

    async fn local_node_token(&self) -> ClusterResult<String>;

    async fn identity(&self) -> ClusterResult<RequestIdentity> {
        Ok(RequestIdentity {
            node_id: self.local_node_id().await?,
            token: self.local_node_token().await?,
        })
    }
}

/// Response body of the internal health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
}

/// Operator request to register a peer.
#[derive(Debug, Clone, Deserialize)]
pub struct AddNodeRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub endpoint: String,
    pub token: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub region: Option<String>,
}

pub struct ClusterManager {
    store: Arc<ClusterStore>,
    transport: Arc<NodeClient>,
    breakers: Arc<BreakerRegistry>,
    config: ClusterSection,
    shutdown: Arc<RwLock<bool>>,
}

impl ClusterManager {
    pub fn new(
        store: Arc<ClusterStore>,
        transport: Arc<NodeClient>,
        breakers: Arc<BreakerRegistry>,
        config: ClusterSection,
    ) -> Self {
        Self {
            store,
            transport,
            breakers,
            config,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    pub fn stop(&self) {
        info!("Stopping cluster manager");
        *self.shutdown.write() = true;
    }

    // ============= Identity =============

    /// Create the cluster config singleton and register the local node as
    /// a peer. A second call fails with `AlreadyInitialized`.
    pub async fn initialize_cluster(
        &self,
        node_name: &str,
        region: &str,
    ) -> ClusterResult<LocalConfig> {
        let now = chrono::Utc::now();
        let config = LocalConfig {
            node_id: Uuid::new_v4().to_string(),
            node_name: node_name.to_string(),
            cluster_token: generate_token(),
            region: region.to_string(),
            enabled: true,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_local_config(&config).await?;

        let mut local_node = Node::new(
            node_name,
            self.config.endpoint.clone(),
            config.cluster_token.clone(),
        );
        local_node.id = config.node_id.clone();
        local_node.region = Some(region.to_string());
        local_node.health_status = HealthStatus::Healthy;
        self.store.insert_node(&local_node).await?;

        info!(node_id = %config.node_id, "Cluster initialized");
        Ok(config)
    }

    pub async fn local_config(&self) -> ClusterResult<Option<LocalConfig>> {
        Ok(self.store.get_local_config().await?)
    }

    /// Flip the enabled flag on join/leave.
    pub async fn set_enabled(&self, enabled: bool) -> ClusterResult<()> {
        if self.store.get_local_config().await?.is_none() {
            return Err(sahab_core::Error::NotInitialized.into());
        }
        self.store.set_cluster_enabled(enabled).await?;
        info!(enabled, "Cluster membership flag updated");
        Ok(())
    }

    // ============= Peer CRUD =============

    pub async fn add_node(&self, request: AddNodeRequest) -> ClusterResult<Node> {
        if request.name.is_empty() {
            return Err(ClusterError::Validation("node name is required".into()));
        }
        if request.endpoint.is_empty() {
            return Err(ClusterError::Validation("node endpoint is required".into()));
        }

        let mut node = Node::new(request.name, request.endpoint, request.token);
        if let Some(id) = request.id.filter(|id| !id.is_empty()) {
            node.id = id;
        }
        node.priority = request.priority;
        node.region = request.region;

        self.store.insert_node(&node).await?;
        info!(node_id = %node.id, name = %node.name, "Node registered");
        Ok(node)
    }

    pub async fn update_node(&self, node: &Node) -> ClusterResult<()> {
        self.store.update_node(node).await?;
        Ok(())
    }

    pub async fn remove_node(&self, node_id: &str) -> ClusterResult<()> {
        self.store.remove_node(node_id).await?;
        self.breakers.remove(node_id);
        info!(node_id, "Node removed");
        Ok(())
    }

    pub async fn get_node(&self, node_id: &str) -> ClusterResult<Option<Node>> {
        Ok(self.store.get_node(node_id).await?)
    }

    pub async fn list_nodes(&self) -> ClusterResult<Vec<Node>> {
        Ok(self.store.list_nodes().await?)
    }

    // ============= Status =============

    /// Aggregate totals by health status; the read surface for operator
    /// dashboards.
    pub async fn cluster_status(&self) -> ClusterResult<ClusterStatus> {
        let local = self.store.get_local_config().await?;
        let nodes = self.store.list_nodes().await?;

        let count = |status: HealthStatus| nodes.iter().filter(|n| n.health_status == status).count();

        Ok(ClusterStatus {
            enabled: local.as_ref().map(|c| c.enabled).unwrap_or(false),
            local_node_id: local.map(|c| c.node_id).unwrap_or_default(),
            total_nodes: nodes.len(),
            healthy_nodes: count(HealthStatus::Healthy),
            degraded_nodes: count(HealthStatus::Degraded),
            unavailable_nodes: count(HealthStatus::Unavailable),
            unknown_nodes: count(HealthStatus::Unknown),
            nodes,
        })
    }

    // ============= Health Probing =============

    /// Background probe loop; one `GET /health` per peer per tick through
    /// the authenticated transport and the peer's breaker.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = std::time::Duration::from_secs(self.config.health_check_interval_secs);
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Health prober started");
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if *manager.shutdown.read() {
                    break;
                }
                if let Err(e) = manager.run_health_cycle().await {
                    error!("Health probe cycle failed: {}", e);
                }
            }
            debug!("Health prober stopped");
        })
    }

    async fn run_health_cycle(&self) -> ClusterResult<()> {
        let Some(local) = self.store.get_local_config().await? else {
            debug!("Cluster not initialized, skipping health probes");
            return Ok(());
        };
        if !local.enabled {
            return Ok(());
        }

        let identity = RequestIdentity {
            node_id: local.node_id.clone(),
            token: local.cluster_token.clone(),
        };
        let nodes = self.store.list_nodes().await?;

        let probes = nodes.into_iter().map(|node| {
            let identity = identity.clone();
            async move {
                if node.id == identity.node_id {
                    // The local node is trivially reachable
                    let _ = self
                        .store
                        .update_node_health(&node.id, HealthStatus::Healthy, 0)
                        .await;
                    return;
                }
                self.probe_node(&identity, &node).await;
            }
        });
        join_all(probes).await;

        Ok(())
    }

    async fn probe_node(&self, identity: &RequestIdentity, node: &Node) {
        let start = Instant::now();
        let result: ClusterResult<HealthResponse> = self
            .transport
            .get_json(
                identity,
                node,
                "/api/internal/cluster/health",
                self.transport.config().aggregate_timeout,
            )
            .await;
        let latency_ms = start.elapsed().as_millis() as i64;

        let (status, error_message) = match &result {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                warn!(node = %node.id, "Health probe failed: {}", e);
                (HealthStatus::Unavailable, Some(e.to_string()))
            }
        };

        if let Err(e) = self
            .store
            .update_node_health(&node.id, status, latency_ms)
            .await
        {
            error!(node = %node.id, "Failed to persist node health: {}", e);
        }
        if let Err(e) = self
            .store
            .insert_health_sample(&node.id, status, latency_ms, error_message.as_deref())
            .await
        {
            error!(node = %node.id, "Failed to append health sample: {}", e);
        }
    }
}

#[async_trait]
impl ClusterView for ClusterManager {
    async fn healthy_nodes(&self) -> ClusterResult<Vec<Node>> {
        let local_id = self
            .store
            .get_local_config()
            .await?
            .map(|c| c.node_id)
            .unwrap_or_default();
        Ok(self.store.list_healthy_nodes(&local_id).await?)
    }

    async fn local_node_id(&self) -> ClusterResult<String> {
        self.store
            .get_local_config()
            .await?
            .map(|c| c.node_id)
            .ok_or_else(|| sahab_core::Error::NotInitialized.into())
    }

    async fn local_node_token(&self) -> ClusterResult<String> {
        self.store
            .get_local_config()
            .await?
            .map(|c| c.cluster_token)
            .ok_or_else(|| sahab_core::Error::NotInitialized.into())
    }
}

impl std::fmt::Debug for ClusterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterManager")
            .field("endpoint", &self.config.endpoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::metrics::ClusterMetrics;
    use crate::transport::TransportConfig;

    async fn test_manager() -> Arc<ClusterManager> {
        let store = Arc::new(ClusterStore::new("sqlite::memory:").await.unwrap());
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
        let metrics = Arc::new(ClusterMetrics::new());
        let transport = Arc::new(
            NodeClient::new(TransportConfig::default(), Arc::clone(&breakers), metrics).unwrap(),
        );
        Arc::new(ClusterManager::new(
            store,
            transport,
            breakers,
            ClusterSection::default(),
        ))
    }

    #[tokio::test]
    async fn test_initialize_once() {
        let manager = test_manager().await;

        let config = manager.initialize_cluster("node-1", "eu").await.unwrap();
        assert!(!config.cluster_token.is_empty());
        assert!(config.enabled);

        // Local node registered as a healthy peer
        let node = manager.get_node(&config.node_id).await.unwrap().unwrap();
        assert_eq!(node.health_status, HealthStatus::Healthy);

        // Second initialize refuses
        let err = manager.initialize_cluster("node-1", "eu").await.unwrap_err();
        assert!(matches!(
            err,
            ClusterError::Metadata(sahab_core::Error::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn test_add_node_generates_id_when_empty() {
        let manager = test_manager().await;

        let node = manager
            .add_node(AddNodeRequest {
                id: None,
                name: "node-2".into(),
                endpoint: "http://node2:9400".into(),
                token: "tok".into(),
                priority: 3,
                region: None,
            })
            .await
            .unwrap();
        assert!(!node.id.is_empty());
        assert_eq!(node.priority, 3);

        let explicit = manager
            .add_node(AddNodeRequest {
                id: Some("fixed-id".into()),
                name: "node-3".into(),
                endpoint: "http://node3:9400".into(),
                token: "tok".into(),
                priority: 0,
                region: None,
            })
            .await
            .unwrap();
        assert_eq!(explicit.id, "fixed-id");
    }

    #[tokio::test]
    async fn test_add_node_validation() {
        let manager = test_manager().await;
        let err = manager
            .add_node(AddNodeRequest {
                id: None,
                name: "".into(),
                endpoint: "http://x".into(),
                token: "tok".into(),
                priority: 0,
                region: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cluster_status_counts() {
        let manager = test_manager().await;
        manager.initialize_cluster("node-1", "eu").await.unwrap();
        manager
            .add_node(AddNodeRequest {
                id: Some("n2".into()),
                name: "node-2".into(),
                endpoint: "http://node2:9400".into(),
                token: "tok".into(),
                priority: 0,
                region: None,
            })
            .await
            .unwrap();

        let status = manager.cluster_status().await.unwrap();
        assert!(status.enabled);
        assert_eq!(status.total_nodes, 2);
        assert_eq!(status.healthy_nodes, 1);
        assert_eq!(status.unknown_nodes, 1);
    }

    #[tokio::test]
    async fn test_healthy_nodes_excludes_local() {
        let manager = test_manager().await;
        let config = manager.initialize_cluster("node-1", "eu").await.unwrap();

        // Only the (healthy) local node exists, so the peer view is empty
        assert!(manager.healthy_nodes().await.unwrap().is_empty());
        assert_eq!(manager.local_node_id().await.unwrap(), config.node_id);
        assert_eq!(
            manager.local_node_token().await.unwrap(),
            config.cluster_token
        );
    }
}
