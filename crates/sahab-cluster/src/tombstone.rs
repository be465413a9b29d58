//! Tombstone log and deletion fan-out
//!
//! Deletions are recorded idempotently by (entity type, entity id) and
//! periodically shipped as a full ordered batch to every healthy peer.
//! A peer applies each entry idempotently and drops the named entity if
//! it still exists. Aged entries are cleaned on a slower timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use sahab_core::types::{EntityKind, Tombstone};
use sahab_crypto::sha256_hash;
use sahab_metadata::{ClusterStore, DirectoryCatalog};

use crate::error::ClusterResult;
use crate::manager::ClusterView;
use crate::sync::SyncAck;
use crate::transport::NodeClient;

pub const DELETION_SYNC_ENDPOINT: &str = "/api/internal/cluster/deletion-log-sync";

#[derive(Debug, Clone)]
pub struct TombstoneConfig {
    /// Entries older than this are removed by the cleaner
    pub retention: Duration,
    /// Fan-out interval
    pub sync_interval: Duration,
    /// Cleaner interval
    pub cleanup_interval: Duration,
    /// Health history beyond this age is pruned alongside tombstones
    pub health_history_retention: Duration,
}

impl Default for TombstoneConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(7 * 24 * 3600),
            sync_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(3600),
            health_history_retention: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

pub struct TombstoneLog {
    store: Arc<ClusterStore>,
    catalog: Arc<dyn DirectoryCatalog>,
    view: Arc<dyn ClusterView>,
    transport: Arc<NodeClient>,
    config: TombstoneConfig,
    /// Checksum of the batch last acknowledged per peer; unchanged sets
    /// are not re-sent.
    last_sent: Mutex<HashMap<String, String>>,
    shutdown: Arc<RwLock<bool>>,
}

impl TombstoneLog {
    pub fn new(
        store: Arc<ClusterStore>,
        catalog: Arc<dyn DirectoryCatalog>,
        view: Arc<dyn ClusterView>,
        transport: Arc<NodeClient>,
        config: TombstoneConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            view,
            transport,
            config,
            last_sent: Mutex::new(HashMap::new()),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    pub fn stop(&self) {
        *self.shutdown.write() = true;
    }

    /// Record a local deletion. Sync bookkeeping for the entity is dropped
    /// so a later re-creation starts from a clean slate.
    pub async fn record_deletion(
        &self,
        entity_type: EntityKind,
        entity_id: &str,
    ) -> ClusterResult<Tombstone> {
        let node_id = self.view.local_node_id().await?;
        let tombstone = Tombstone::new(entity_type, entity_id, node_id);
        self.store.record_tombstone(&tombstone).await?;
        self.store.clear_sync_rows(entity_type, entity_id).await?;
        debug!(kind = %entity_type, entity_id, "Deletion recorded");
        Ok(tombstone)
    }

    /// Apply a batch received from a peer. Returns how many named entities
    /// were actually deleted locally.
    pub async fn apply_entries(&self, entries: &[Tombstone]) -> ClusterResult<usize> {
        let mut deleted = 0;
        for entry in entries {
            self.store.record_tombstone(entry).await?;
            self.store
                .clear_sync_rows(entry.entity_type, &entry.entity_id)
                .await?;
            if self
                .catalog
                .delete_entity(entry.entity_type, &entry.entity_id)
                .await?
            {
                deleted += 1;
                info!(kind = %entry.entity_type, entity_id = %entry.entity_id,
                      "Entity removed by deletion log");
            }
        }
        Ok(deleted)
    }

    /// One fan-out pass: ship the full ordered set to every healthy peer
    /// that has not acknowledged this exact set yet.
    pub async fn fanout_cycle(&self) -> ClusterResult<()> {
        let tombstones = self.store.list_tombstones().await?;
        if tombstones.is_empty() {
            return Ok(());
        }

        let checksum = content_checksum(&tombstones);
        let peers = self.view.healthy_nodes().await?;
        if peers.is_empty() {
            return Ok(());
        }
        let identity = self.view.identity().await?;

        for peer in peers {
            if self.last_sent.lock().get(&peer.id) == Some(&checksum) {
                continue;
            }

            let result: ClusterResult<SyncAck> = self
                .transport
                .post_json(
                    &identity,
                    &peer,
                    DELETION_SYNC_ENDPOINT,
                    &tombstones,
                    self.transport.config().sync_timeout,
                )
                .await;

            match result {
                Ok(_) => {
                    self.last_sent.lock().insert(peer.id.clone(), checksum.clone());
                    debug!(peer = %peer.id, entries = tombstones.len(), "Deletion log shipped");
                }
                Err(e) => {
                    warn!(peer = %peer.id, "Deletion log push failed: {}", e);
                }
            }
        }

        Ok(())
    }

    /// Remove aged tombstones and stale health history.
    pub async fn cleanup_cycle(&self) -> ClusterResult<()> {
        let removed = self
            .store
            .cleanup_tombstones(chrono::Duration::from_std(self.config.retention).unwrap_or(
                chrono::Duration::days(7),
            ))
            .await?;
        if removed > 0 {
            info!(removed, "Aged tombstones removed");
        }

        let pruned = self
            .store
            .prune_health_history(
                chrono::Duration::from_std(self.config.health_history_retention)
                    .unwrap_or(chrono::Duration::days(30)),
            )
            .await?;
        if pruned > 0 {
            debug!(pruned, "Health history pruned");
        }
        Ok(())
    }

    /// Spawn the fan-out and cleaner loops.
    pub fn start(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let log = Arc::clone(self);
        let fanout = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(log.config.sync_interval);
            loop {
                ticker.tick().await;
                if *log.shutdown.read() {
                    break;
                }
                if let Err(e) = log.fanout_cycle().await {
                    error!("Tombstone fan-out failed: {}", e);
                }
            }
            debug!("Tombstone fan-out stopped");
        });

        let log = Arc::clone(self);
        let cleaner = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(log.config.cleanup_interval);
            loop {
                ticker.tick().await;
                if *log.shutdown.read() {
                    break;
                }
                if let Err(e) = log.cleanup_cycle().await {
                    error!("Tombstone cleanup failed: {}", e);
                }
            }
            debug!("Tombstone cleaner stopped");
        });

        vec![fanout, cleaner]
    }
}

/// Deterministic checksum over the full ordered set.
fn content_checksum(entries: &[Tombstone]) -> String {
    let mut buffer = String::new();
    for entry in entries {
        buffer.push_str(entry.entity_type.as_str());
        buffer.push('|');
        buffer.push_str(&entry.entity_id);
        buffer.push('|');
        buffer.push_str(&entry.deleted_by_node_id);
        buffer.push('|');
        buffer.push_str(&entry.deleted_at.to_rfc3339());
        buffer.push('\n');
    }
    sha256_hash(buffer.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{StubCatalog, StubView};
    use crate::breaker::BreakerRegistry;
    use crate::metrics::ClusterMetrics;
    use crate::transport::TransportConfig;

    async fn test_log() -> (Arc<TombstoneLog>, Arc<StubCatalog>) {
        let store = Arc::new(ClusterStore::new("sqlite::memory:").await.unwrap());
        let catalog = Arc::new(StubCatalog::default());
        let view = Arc::new(StubView::default());
        let breakers = Arc::new(BreakerRegistry::default());
        let metrics = Arc::new(ClusterMetrics::new());
        let transport =
            Arc::new(NodeClient::new(TransportConfig::default(), breakers, metrics).unwrap());

        let log = Arc::new(TombstoneLog::new(
            store,
            Arc::clone(&catalog) as Arc<dyn DirectoryCatalog>,
            view,
            transport,
            TombstoneConfig::default(),
        ));
        (log, catalog)
    }

    #[tokio::test]
    async fn test_record_deletion_is_idempotent() {
        let (log, _) = test_log().await;

        log.record_deletion(EntityKind::User, "u1").await.unwrap();
        log.record_deletion(EntityKind::User, "u1").await.unwrap();

        let entries = log.store.list_tombstones().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].deleted_by_node_id, "local-node");
    }

    #[tokio::test]
    async fn test_apply_entries_deletes_locally() {
        let (log, catalog) = test_log().await;
        catalog.seed_entity("u1");

        let entries = vec![
            Tombstone::new(EntityKind::User, "u1", "nodeB"),
            Tombstone::new(EntityKind::Tenant, "t-gone", "nodeB"),
        ];
        let deleted = log.apply_entries(&entries).await.unwrap();

        // Only u1 existed locally
        assert_eq!(deleted, 1);
        assert_eq!(catalog.deleted(), vec!["user:u1", "tenant:t-gone"]);

        // Applying again still leaves a single tombstone per entity
        log.apply_entries(&entries).await.unwrap();
        assert_eq!(log.store.list_tombstones().await.unwrap().len(), 2);
    }

    #[test]
    fn test_content_checksum_is_order_and_content_sensitive() {
        let a = Tombstone::new(EntityKind::User, "u1", "n1");
        let b = Tombstone::new(EntityKind::User, "u2", "n1");

        let forward = content_checksum(&[a.clone(), b.clone()]);
        let reversed = content_checksum(&[b.clone(), a.clone()]);
        let repeat = content_checksum(&[a.clone(), b.clone()]);

        assert_eq!(forward, repeat);
        assert_ne!(forward, reversed);
        assert_ne!(forward, content_checksum(&[a]));
    }
}
