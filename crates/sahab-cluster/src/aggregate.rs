//! Scatter-gather aggregators
//!
//! Quota and bucket-listing fan-outs over the healthy peers. One task per
//! peer bounded by a per-call timeout; partial failure returns what
//! succeeded, and only an all-peers failure is an error.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sahab_core::types::{BucketInfo, BucketWithLocation, Node, TenantUsage};

use crate::error::{ClusterError, ClusterResult};
use crate::manager::ClusterView;
use crate::metrics::ClusterMetrics;
use crate::transport::NodeClient;

/// Response body of the per-peer bucket listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketsResponse {
    pub buckets: Vec<BucketInfo>,
}

/// Sums per-tenant storage usage across every healthy peer.
pub struct QuotaAggregator {
    view: Arc<dyn ClusterView>,
    transport: Arc<NodeClient>,
    metrics: Arc<ClusterMetrics>,
}

impl QuotaAggregator {
    pub fn new(
        view: Arc<dyn ClusterView>,
        transport: Arc<NodeClient>,
        metrics: Arc<ClusterMetrics>,
    ) -> Self {
        Self {
            view,
            transport,
            metrics,
        }
    }

    /// Total storage bytes reported by the peers for one tenant. No peers
    /// means zero; partial failure returns the partial sum.
    pub async fn total_tenant_usage(&self, tenant_id: &str) -> ClusterResult<u64> {
        let start = Instant::now();
        let result = self.fan_out(tenant_id).await;
        self.metrics
            .quota_aggregation
            .record(result.is_ok(), start.elapsed());
        result
    }

    async fn fan_out(&self, tenant_id: &str) -> ClusterResult<u64> {
        let peers = self.view.healthy_nodes().await?;
        if peers.is_empty() {
            return Ok(0);
        }
        let identity = self.view.identity().await?;
        let timeout = self.transport.config().aggregate_timeout;
        let path = format!("/api/internal/cluster/tenant/{}/storage", tenant_id);

        let calls = peers.iter().map(|peer| {
            let path = path.clone();
            let identity = identity.clone();
            async move {
                let result: ClusterResult<TenantUsage> = self
                    .transport
                    .get_json(&identity, peer, &path, timeout)
                    .await;
                (peer, result)
            }
        });

        let mut total: u64 = 0;
        let mut failures = 0;
        for (peer, result) in join_all(calls).await {
            match result {
                Ok(usage) => total += usage.current_storage_bytes,
                Err(e) => {
                    failures += 1;
                    warn!(peer = %peer.id, tenant_id, "Quota fetch failed: {}", e);
                }
            }
        }

        if failures == peers.len() {
            return Err(ClusterError::AllPeersFailed(format!(
                "quota aggregation for tenant {}",
                tenant_id
            )));
        }
        if failures > 0 {
            debug!(tenant_id, failures, peers = peers.len(), "Partial quota aggregation");
        }
        Ok(total)
    }
}

/// Concatenates bucket listings from every healthy peer, annotating each
/// bucket with its origin node.
pub struct BucketAggregator {
    view: Arc<dyn ClusterView>,
    transport: Arc<NodeClient>,
    metrics: Arc<ClusterMetrics>,
}

impl BucketAggregator {
    pub fn new(
        view: Arc<dyn ClusterView>,
        transport: Arc<NodeClient>,
        metrics: Arc<ClusterMetrics>,
    ) -> Self {
        Self {
            view,
            transport,
            metrics,
        }
    }

    /// Buckets across the cluster, unordered. Results carry the origin
    /// node's id, name and status.
    pub async fn list_cluster_buckets(
        &self,
        tenant_id: Option<&str>,
    ) -> ClusterResult<Vec<BucketWithLocation>> {
        let start = Instant::now();
        let result = self.fan_out(tenant_id).await;
        self.metrics
            .bucket_aggregation
            .record(result.is_ok(), start.elapsed());
        result
    }

    async fn fan_out(&self, tenant_id: Option<&str>) -> ClusterResult<Vec<BucketWithLocation>> {
        let peers = self.view.healthy_nodes().await?;
        if peers.is_empty() {
            return Ok(Vec::new());
        }
        let identity = self.view.identity().await?;
        let timeout = self.transport.config().aggregate_timeout;
        let path = match tenant_id {
            Some(id) => format!("/api/internal/cluster/buckets?tenant_id={}", id),
            None => "/api/internal/cluster/buckets".to_string(),
        };

        let calls = peers.iter().map(|peer| {
            let path = path.clone();
            let identity = identity.clone();
            async move {
                let result: ClusterResult<BucketsResponse> = self
                    .transport
                    .get_json(&identity, peer, &path, timeout)
                    .await;
                (peer, result)
            }
        });

        let mut buckets = Vec::new();
        let mut failures = 0;
        for (peer, result) in join_all(calls).await {
            match result {
                Ok(response) => buckets.extend(annotate(response.buckets, peer)),
                Err(e) => {
                    failures += 1;
                    warn!(peer = %peer.id, "Bucket listing failed: {}", e);
                }
            }
        }

        if failures == peers.len() {
            return Err(ClusterError::AllPeersFailed(
                "bucket listing aggregation".into(),
            ));
        }
        if failures > 0 {
            debug!(failures, peers = peers.len(), "Partial bucket aggregation");
        }
        Ok(buckets)
    }
}

fn annotate(buckets: Vec<BucketInfo>, node: &Node) -> Vec<BucketWithLocation> {
    buckets
        .into_iter()
        .map(|bucket| BucketWithLocation {
            bucket,
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            node_status: node.health_status,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerRegistry;
    use crate::testutil::StubView;
    use crate::transport::TransportConfig;
    use chrono::Utc;
    use sahab_core::types::HealthStatus;
    use std::collections::HashMap;

    fn transport(metrics: Arc<ClusterMetrics>) -> Arc<NodeClient> {
        Arc::new(
            NodeClient::new(
                TransportConfig::default(),
                Arc::new(BreakerRegistry::default()),
                metrics,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_quota_with_no_peers_is_zero() {
        let metrics = Arc::new(ClusterMetrics::new());
        let aggregator = QuotaAggregator::new(
            Arc::new(StubView::default()),
            transport(Arc::clone(&metrics)),
            metrics,
        );
        assert_eq!(aggregator.total_tenant_usage("t1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_quota_all_peers_failing_is_an_error() {
        // Both stub peers sit behind a closed port
        let metrics = Arc::new(ClusterMetrics::new());
        let aggregator = QuotaAggregator::new(
            Arc::new(StubView::with_peers(vec!["n2", "n3"])),
            transport(Arc::clone(&metrics)),
            Arc::clone(&metrics),
        );
        let err = aggregator.total_tenant_usage("t1").await.unwrap_err();
        assert!(matches!(err, ClusterError::AllPeersFailed(_)));

        let snap = metrics.snapshot();
        assert_eq!(snap["quota_aggregation"]["failures"], 1);
    }

    #[tokio::test]
    async fn test_buckets_with_no_peers_is_empty() {
        let metrics = Arc::new(ClusterMetrics::new());
        let aggregator = BucketAggregator::new(
            Arc::new(StubView::default()),
            transport(Arc::clone(&metrics)),
            metrics,
        );
        assert!(aggregator.list_cluster_buckets(None).await.unwrap().is_empty());
    }

    #[test]
    fn test_annotation_carries_origin_node() {
        let mut node = Node::new("node-2", "http://n2:9400", "tok".to_string());
        node.id = "n2".into();
        node.health_status = HealthStatus::Healthy;

        let buckets = vec![BucketInfo {
            name: "photos".into(),
            tenant_id: "t1".into(),
            owner_id: None,
            object_count: 3,
            size_bytes: 42,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }];

        let annotated = annotate(buckets, &node);
        assert_eq!(annotated.len(), 1);
        assert_eq!(annotated[0].node_id, "n2");
        assert_eq!(annotated[0].node_name, "node-2");
        assert_eq!(annotated[0].node_status, HealthStatus::Healthy);
        assert_eq!(annotated[0].bucket.name, "photos");
    }
}
