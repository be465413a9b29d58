//! Per-entity sync engines
//!
//! One uniform pipeline shared by every directory entity kind: scan local
//! records, derive a content checksum, skip records whose last pushed
//! checksum on the destination already matches, push the rest as full JSON
//! records, and record the outcome per (entity, peer). Deletions propagate
//! through the tombstone log, not here.

mod entities;

pub use entities::SyncEntity;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use sahab_core::config::global_config;
use sahab_core::types::{EntityKind, Node};
use sahab_metadata::{ClusterStore, DirectoryCatalog};

use crate::error::ClusterResult;
use crate::manager::ClusterView;
use crate::transport::{NodeClient, RequestIdentity};

/// Acknowledgement body for sync pushes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncAck {
    pub success: bool,
}

/// Outcome of one cycle for one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCycleStats {
    pub pushed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct SyncEngine {
    store: Arc<ClusterStore>,
    catalog: Arc<dyn DirectoryCatalog>,
    view: Arc<dyn ClusterView>,
    transport: Arc<NodeClient>,
    shutdown: Arc<RwLock<bool>>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<ClusterStore>,
        catalog: Arc<dyn DirectoryCatalog>,
        view: Arc<dyn ClusterView>,
        transport: Arc<NodeClient>,
    ) -> Self {
        Self {
            store,
            catalog,
            view,
            transport,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    pub fn stop(&self) {
        info!("Stopping sync engines");
        *self.shutdown.write() = true;
    }

    /// Spawn one loop per entity kind. Each loop re-reads its enable flag
    /// and interval from global config on every tick, so runtime changes
    /// take effect without a restart.
    pub fn start(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        EntityKind::ALL
            .iter()
            .map(|&kind| {
                let engine = Arc::clone(self);
                tokio::spawn(async move {
                    info!(kind = %kind, "Sync engine started");
                    loop {
                        let interval = engine
                            .store
                            .get_global_i64(&global_config::sync_interval_key(kind), 30)
                            .await
                            .unwrap_or(30)
                            .max(1);
                        tokio::time::sleep(Duration::from_secs(interval as u64)).await;

                        if *engine.shutdown.read() {
                            break;
                        }

                        let enabled = engine
                            .store
                            .get_global_bool(&global_config::sync_enabled_key(kind), true)
                            .await
                            .unwrap_or(true);
                        if !enabled {
                            continue;
                        }

                        if let Err(e) = engine.run_cycle(kind).await {
                            error!(kind = %kind, "Sync cycle failed: {}", e);
                        }
                    }
                    debug!(kind = %kind, "Sync engine stopped");
                })
            })
            .collect()
    }

    /// One full cycle for one kind.
    pub async fn run_cycle(&self, kind: EntityKind) -> ClusterResult<SyncCycleStats> {
        match kind {
            EntityKind::Tenant => {
                let records = self.catalog.list_tenants().await?;
                self.sync_records(&records).await
            }
            EntityKind::User => {
                let records = self.catalog.list_users().await?;
                self.sync_records(&records).await
            }
            EntityKind::AccessKey => {
                let records = self.catalog.list_access_keys().await?;
                self.sync_records(&records).await
            }
            EntityKind::BucketPermission => {
                let records = self.catalog.list_bucket_permissions().await?;
                self.sync_records(&records).await
            }
            EntityKind::IdpProvider => {
                let records = self.catalog.list_idp_providers().await?;
                self.sync_records(&records).await
            }
            EntityKind::GroupMapping => {
                let records = self.catalog.list_group_mappings().await?;
                self.sync_records(&records).await
            }
        }
    }

    /// Push the differing records of one kind to every healthy peer. One
    /// peer's failures never block the others; a failed push is retried by
    /// the next tick.
    pub async fn sync_records<E: SyncEntity>(&self, records: &[E]) -> ClusterResult<SyncCycleStats> {
        let peers = self.view.healthy_nodes().await?;
        if peers.is_empty() || records.is_empty() {
            return Ok(SyncCycleStats::default());
        }
        let identity = self.view.identity().await?;

        let per_peer = peers
            .iter()
            .map(|peer| self.sync_records_to_peer(records, peer, &identity));
        let outcomes = join_all(per_peer).await;

        let mut total = SyncCycleStats::default();
        for outcome in outcomes {
            total.pushed += outcome.pushed;
            total.skipped += outcome.skipped;
            total.failed += outcome.failed;
        }

        if total.pushed > 0 || total.failed > 0 {
            info!(
                kind = %E::KIND,
                pushed = total.pushed,
                skipped = total.skipped,
                failed = total.failed,
                "Sync cycle finished"
            );
        }
        Ok(total)
    }

    async fn sync_records_to_peer<E: SyncEntity>(
        &self,
        records: &[E],
        peer: &Node,
        identity: &RequestIdentity,
    ) -> SyncCycleStats {
        let mut stats = SyncCycleStats::default();

        for record in records {
            let checksum = record.checksum();
            let stored = match self
                .store
                .sync_checksum(E::KIND, record.entity_id(), &peer.id)
                .await
            {
                Ok(stored) => stored,
                Err(e) => {
                    error!(kind = %E::KIND, peer = %peer.id, "Sync status lookup failed: {}", e);
                    stats.failed += 1;
                    continue;
                }
            };

            if stored.as_deref() == Some(checksum.as_str()) {
                stats.skipped += 1;
                continue;
            }

            let result: ClusterResult<SyncAck> = self
                .transport
                .post_json(
                    identity,
                    peer,
                    E::KIND.sync_endpoint(),
                    record,
                    self.transport.config().sync_timeout,
                )
                .await;

            match result {
                Ok(_) => {
                    if let Err(e) = self
                        .store
                        .record_sync_success(
                            E::KIND,
                            record.entity_id(),
                            &peer.id,
                            &identity.node_id,
                            &checksum,
                        )
                        .await
                    {
                        error!(kind = %E::KIND, "Failed to record sync success: {}", e);
                    }
                    stats.pushed += 1;
                }
                Err(e) => {
                    warn!(kind = %E::KIND, peer = %peer.id,
                          entity = %record.entity_id(), "Sync push failed: {}", e);
                    if let Err(e) = self
                        .store
                        .record_sync_failure(
                            E::KIND,
                            record.entity_id(),
                            &peer.id,
                            &identity.node_id,
                            &e.to_string(),
                        )
                        .await
                    {
                        error!(kind = %E::KIND, "Failed to record sync failure: {}", e);
                    }
                    stats.failed += 1;
                }
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerRegistry;
    use crate::metrics::ClusterMetrics;
    use crate::testutil::{test_tenant, StubCatalog, StubView};
    use crate::transport::TransportConfig;

    async fn test_engine(view: StubView) -> SyncEngine {
        let store = Arc::new(ClusterStore::new("sqlite::memory:").await.unwrap());
        let catalog = Arc::new(StubCatalog::default());
        let breakers = Arc::new(BreakerRegistry::default());
        let metrics = Arc::new(ClusterMetrics::new());
        let transport =
            Arc::new(NodeClient::new(TransportConfig::default(), breakers, metrics).unwrap());
        SyncEngine::new(store, catalog, Arc::new(view), transport)
    }

    #[tokio::test]
    async fn test_no_peers_is_a_noop() {
        let engine = test_engine(StubView::default()).await;
        let stats = engine.sync_records(&[test_tenant("t1")]).await.unwrap();
        assert_eq!(stats, SyncCycleStats::default());
    }

    #[tokio::test]
    async fn test_matching_checksum_skips_push() {
        let view = StubView::with_peers(vec!["n2"]);
        let engine = test_engine(view).await;

        let tenant = test_tenant("t1");
        // Pretend an earlier cycle already pushed the current version
        engine
            .store
            .record_sync_success(EntityKind::Tenant, "t1", "n2", "local-node", &tenant.checksum())
            .await
            .unwrap();

        let stats = engine.sync_records(&[tenant]).await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.pushed, 0);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_unreachable_peer_records_failure_and_keeps_checksum() {
        // The stub peer endpoint points at a closed port, so the push fails
        let view = StubView::with_peers(vec!["n2"]);
        let engine = test_engine(view).await;

        let tenant = test_tenant("t1");
        engine
            .store
            .record_sync_success(EntityKind::Tenant, "t1", "n2", "local-node", "stale")
            .await
            .unwrap();

        let stats = engine.sync_records(&[tenant]).await.unwrap();
        assert_eq!(stats.failed, 1);

        // The stale checksum survives the failure, so the next cycle retries
        assert_eq!(
            engine
                .store
                .sync_checksum(EntityKind::Tenant, "t1", "n2")
                .await
                .unwrap()
                .as_deref(),
            Some("stale")
        );
    }
}
