//! Bucket replication pipeline
//!
//! A scheduler expands due rules into one queue item per live object, a
//! loader drains the persistent queue into a bounded channel, and a worker
//! pool pushes each object to its destination node. Enqueueing is
//! idempotent per (rule, key); retries are budgeted per item.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use sahab_core::config::global_config;
use sahab_core::types::{
    ObjectInfo, QueueItemStatus, QueueOperation, ReplicationObjectStatus, ReplicationQueueItem,
    ReplicationRule,
};
use sahab_metadata::{object_path, ClusterStore, ObjectCatalog, ObjectStore};

use crate::envelope;
use crate::error::{ClusterError, ClusterResult};
use crate::manager::ClusterView;
use crate::transport::NodeClient;

#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Rule scheduler interval
    pub scheduler_interval: Duration,
    /// Pending items fetched per loader pass
    pub batch_size: i64,
    /// Bound of the in-memory hand-off channel
    pub channel_capacity: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            scheduler_interval: Duration::from_secs(5),
            batch_size: 100,
            channel_capacity: 200,
        }
    }
}

pub struct ReplicationPipeline {
    store: Arc<ClusterStore>,
    object_catalog: Arc<dyn ObjectCatalog>,
    object_store: Arc<dyn ObjectStore>,
    view: Arc<dyn ClusterView>,
    transport: Arc<NodeClient>,
    config: ReplicationConfig,
    shutdown: Arc<RwLock<bool>>,
}

impl ReplicationPipeline {
    pub fn new(
        store: Arc<ClusterStore>,
        object_catalog: Arc<dyn ObjectCatalog>,
        object_store: Arc<dyn ObjectStore>,
        view: Arc<dyn ClusterView>,
        transport: Arc<NodeClient>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            store,
            object_catalog,
            object_store,
            view,
            transport,
            config,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    pub fn stop(&self) {
        info!("Stopping replication pipeline");
        *self.shutdown.write() = true;
    }

    // ============= Rule Management =============

    /// Validate and persist a rule. The interval is clamped against the
    /// configured minimum and the destination node must be registered.
    pub async fn create_rule(&self, mut rule: ReplicationRule) -> ClusterResult<ReplicationRule> {
        if rule.source_bucket.is_empty() {
            return Err(ClusterError::Validation("source bucket is required".into()));
        }
        if rule.destination_bucket.is_empty() {
            rule.destination_bucket = rule.source_bucket.clone();
        }

        let min_interval = self
            .store
            .get_global_i64(global_config::MIN_SYNC_INTERVAL_SECONDS, 10)
            .await?;
        if rule.sync_interval_seconds == 0 {
            rule.sync_interval_seconds = self
                .store
                .get_global_i64(global_config::DEFAULT_SYNC_INTERVAL_SECONDS, 60)
                .await?;
        }
        if rule.sync_interval_seconds < min_interval {
            return Err(ClusterError::Validation(format!(
                "sync interval {}s is below the configured minimum {}s",
                rule.sync_interval_seconds, min_interval
            )));
        }

        if self.store.get_node(&rule.destination_node_id).await?.is_none() {
            return Err(ClusterError::NodeNotFound(rule.destination_node_id.clone()));
        }

        self.store.create_rule(&rule).await?;
        info!(rule_id = %rule.id, bucket = %rule.source_bucket, "Replication rule created");
        Ok(rule)
    }

    pub async fn update_rule(&self, rule: &ReplicationRule) -> ClusterResult<()> {
        Ok(self.store.update_rule(rule).await?)
    }

    pub async fn delete_rule(&self, rule_id: &str) -> ClusterResult<()> {
        Ok(self.store.delete_rule(rule_id).await?)
    }

    pub async fn list_rules(&self) -> ClusterResult<Vec<ReplicationRule>> {
        Ok(self.store.list_rules().await?)
    }

    // ============= Scheduling =============

    /// One scheduler pass: expand every due rule into pending queue items.
    pub async fn scheduler_cycle(&self) -> ClusterResult<()> {
        let rules = self.store.list_enabled_rules().await?;
        let now = Utc::now();

        for rule in rules {
            if !rule.is_due(now) {
                continue;
            }

            let objects = self
                .object_catalog
                .list_live_objects(&rule.tenant_id, &rule.source_bucket, rule.prefix.as_deref())
                .await?;

            let mut enqueued = 0;
            for object in &objects {
                let item =
                    ReplicationQueueItem::from_rule(&rule, object.key.clone(), QueueOperation::Put);
                if self.store.enqueue_item(&item).await? {
                    enqueued += 1;
                }
            }

            self.store.touch_rule_last_sync(&rule.id).await?;
            if enqueued > 0 {
                debug!(rule_id = %rule.id, enqueued, total = objects.len(),
                       "Rule scheduled");
            }
        }

        Ok(())
    }

    /// Called by the object layer when a source object is deleted; enqueues
    /// DELETE items for every matching rule that replicates deletes.
    pub async fn notify_object_deleted(
        &self,
        tenant_id: &str,
        bucket: &str,
        key: &str,
    ) -> ClusterResult<usize> {
        let rules = self.store.list_enabled_rules().await?;
        let mut enqueued = 0;

        for rule in rules {
            if !rule.replicate_deletes
                || rule.tenant_id != tenant_id
                || rule.source_bucket != bucket
            {
                continue;
            }
            if let Some(prefix) = &rule.prefix {
                if !key.starts_with(prefix.as_str()) {
                    continue;
                }
            }

            let item = ReplicationQueueItem::from_rule(&rule, key, QueueOperation::Delete);
            if self.store.enqueue_item(&item).await? {
                enqueued += 1;
            }
        }

        Ok(enqueued)
    }

    // ============= Workers =============

    /// Spawn the scheduler, the queue loader and the worker pool. The
    /// worker count comes from global config at startup; the loader
    /// interval is re-read every pass.
    pub async fn start(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        // Scheduler
        let pipeline = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pipeline.config.scheduler_interval);
            loop {
                ticker.tick().await;
                if *pipeline.shutdown.read() {
                    break;
                }
                if let Err(e) = pipeline.scheduler_cycle().await {
                    error!("Replication scheduler failed: {}", e);
                }
            }
            debug!("Replication scheduler stopped");
        }));

        // Loader + worker pool share a bounded channel. Items still in the
        // channel at shutdown stay `pending` in the table for the next run.
        let (tx, rx) = mpsc::channel::<ReplicationQueueItem>(self.config.channel_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let worker_count = self
            .store
            .get_global_i64(global_config::REPLICATION_WORKER_COUNT, 5)
            .await
            .unwrap_or(5)
            .max(1) as usize;

        for worker_id in 0..worker_count {
            let pipeline = Arc::clone(self);
            let rx = Arc::clone(&rx);
            handles.push(tokio::spawn(async move {
                loop {
                    let item = { rx.lock().await.recv().await };
                    let Some(item) = item else {
                        break;
                    };
                    if let Err(e) = pipeline.process_item(&item).await {
                        warn!(worker_id, item_id = %item.id, "Replication item failed: {}", e);
                    }
                }
                debug!(worker_id, "Replication worker stopped");
            }));
        }

        let pipeline = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            info!(workers = worker_count, "Replication pipeline started");
            loop {
                let interval = pipeline
                    .store
                    .get_global_i64(global_config::QUEUE_CHECK_INTERVAL_SECONDS, 10)
                    .await
                    .unwrap_or(10)
                    .max(1);
                tokio::time::sleep(Duration::from_secs(interval as u64)).await;

                if *pipeline.shutdown.read() {
                    // Dropping the sender closes the channel and stops the
                    // workers after the in-flight items.
                    break;
                }

                match pipeline.store.fetch_pending_items(pipeline.config.batch_size).await {
                    Ok(items) => {
                        for item in items {
                            if tx.send(item).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => error!("Queue load failed: {}", e),
                }
            }
            debug!("Replication queue loader stopped");
        }));

        handles
    }

    /// Execute one queue item end to end.
    pub async fn process_item(&self, item: &ReplicationQueueItem) -> ClusterResult<()> {
        // Claim; a stale duplicate from the channel loses the race here.
        if !self.store.mark_item_processing(&item.id).await? {
            return Ok(());
        }

        let result = self.execute_item(item).await;
        match result {
            Ok(_) => {
                self.store.complete_item(&item.id).await?;
                Ok(())
            }
            Err(e) => {
                let status = self.store.fail_item(&item.id, &e.to_string()).await?;
                if status == QueueItemStatus::Failed {
                    warn!(item_id = %item.id, key = %item.object_key,
                          "Replication item terminally failed: {}", e);
                } else {
                    debug!(item_id = %item.id, "Replication attempt failed, will retry: {}", e);
                }
                Err(e)
            }
        }
    }

    async fn execute_item(&self, item: &ReplicationQueueItem) -> ClusterResult<()> {
        let identity = self.view.identity().await?;
        let node = self
            .store
            .get_node(&item.destination_node_id)
            .await?
            .ok_or_else(|| ClusterError::NodeNotFound(item.destination_node_id.clone()))?;

        let path = format!(
            "/api/internal/cluster/objects/{}/{}/{}",
            item.tenant_id, item.destination_bucket, item.object_key
        );

        match item.operation {
            QueueOperation::Put => {
                let Some(object) = self
                    .object_catalog
                    .get_object_info(&item.tenant_id, &item.source_bucket, &item.object_key)
                    .await?
                else {
                    // The object vanished since enqueue; nothing to push.
                    debug!(key = %item.object_key, "Source object gone, skipping");
                    return Ok(());
                };

                let (reader, size) = self
                    .object_store
                    .get(&object_path(
                        &item.tenant_id,
                        &item.source_bucket,
                        &item.object_key,
                    ))
                    .await?;

                let destination_etag = self
                    .transport
                    .put_object(
                        &identity,
                        &node,
                        &path,
                        reqwest::Body::wrap_stream(ReaderStream::new(reader)),
                        object_headers(&object),
                    )
                    .await?;

                self.store
                    .upsert_replication_status(&ReplicationObjectStatus {
                        rule_id: item.rule_id.clone(),
                        object_key: item.object_key.clone(),
                        source_version_id: object.version_id.clone(),
                        destination_version_id: None,
                        source_etag: Some(object.etag.clone()),
                        destination_etag,
                        source_size: size as i64,
                        destination_size: size as i64,
                        status: "completed".to_string(),
                        last_sync_at: Utc::now(),
                    })
                    .await?;
                self.store
                    .add_rule_counters(&item.rule_id, 1, size as i64)
                    .await?;
            }
            QueueOperation::Delete => {
                self.transport
                    .delete(
                        &identity,
                        &node,
                        &path,
                        self.transport.config().sync_timeout,
                    )
                    .await?;

                self.store
                    .upsert_replication_status(&ReplicationObjectStatus {
                        rule_id: item.rule_id.clone(),
                        object_key: item.object_key.clone(),
                        source_version_id: None,
                        destination_version_id: None,
                        source_etag: None,
                        destination_etag: None,
                        source_size: 0,
                        destination_size: 0,
                        status: "deleted".to_string(),
                        last_sync_at: Utc::now(),
                    })
                    .await?;
            }
        }

        Ok(())
    }
}

fn object_headers(object: &ObjectInfo) -> Vec<(String, String)> {
    let mut headers = vec![
        (
            envelope::HEADER_OBJECT_SIZE.to_string(),
            object.size.to_string(),
        ),
        (envelope::HEADER_OBJECT_ETAG.to_string(), object.etag.clone()),
        (
            http::header::CONTENT_TYPE.to_string(),
            object.content_type.clone(),
        ),
    ];
    if !object.metadata.is_empty() {
        if let Ok(blob) = serde_json::to_string(&object.metadata) {
            headers.push((envelope::HEADER_OBJECT_METADATA.to_string(), blob));
        }
    }
    if let Some(version_id) = &object.version_id {
        headers.push((
            envelope::HEADER_SOURCE_VERSION_ID.to_string(),
            version_id.clone(),
        ));
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerRegistry;
    use crate::metrics::ClusterMetrics;
    use crate::testutil::{test_object, StubObjectCatalog, StubObjectStore, StubView};
    use crate::transport::TransportConfig;
    use sahab_core::types::Node;

    struct Fixture {
        pipeline: Arc<ReplicationPipeline>,
        objects: Arc<StubObjectCatalog>,
        store: Arc<ClusterStore>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(ClusterStore::new("sqlite::memory:").await.unwrap());
        store
            .seed_global_defaults(&global_config::defaults())
            .await
            .unwrap();

        // A registered destination node behind a closed port
        let mut node = Node::new("node-2", "http://127.0.0.1:1", "tok".to_string());
        node.id = "n2".to_string();
        store.insert_node(&node).await.unwrap();

        let objects = Arc::new(StubObjectCatalog::default());
        let blobs = Arc::new(StubObjectStore::default());
        let breakers = Arc::new(BreakerRegistry::default());
        let metrics = Arc::new(ClusterMetrics::new());
        let transport =
            Arc::new(NodeClient::new(TransportConfig::default(), breakers, metrics).unwrap());

        let pipeline = Arc::new(ReplicationPipeline::new(
            Arc::clone(&store),
            Arc::clone(&objects) as Arc<dyn ObjectCatalog>,
            blobs as Arc<dyn ObjectStore>,
            Arc::new(StubView::default()),
            transport,
            ReplicationConfig::default(),
        ));

        Fixture {
            pipeline,
            objects,
            store,
        }
    }

    fn rule_to_n2() -> ReplicationRule {
        let mut rule = ReplicationRule::new("t1", "photos", "n2", "photos");
        rule.sync_interval_seconds = 60;
        rule
    }

    #[tokio::test]
    async fn test_create_rule_validates_interval() {
        let f = fixture().await;

        let mut rule = rule_to_n2();
        rule.sync_interval_seconds = 3;
        let err = f.pipeline.create_rule(rule).await.unwrap_err();
        assert!(matches!(err, ClusterError::Validation(_)));

        // Zero picks up the default interval
        let mut rule = rule_to_n2();
        rule.sync_interval_seconds = 0;
        let created = f.pipeline.create_rule(rule).await.unwrap();
        assert_eq!(created.sync_interval_seconds, 60);
    }

    #[tokio::test]
    async fn test_create_rule_requires_known_destination() {
        let f = fixture().await;
        let mut rule = rule_to_n2();
        rule.destination_node_id = "ghost".into();
        assert!(matches!(
            f.pipeline.create_rule(rule).await.unwrap_err(),
            ClusterError::NodeNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_scheduler_enqueues_once_per_object() {
        let f = fixture().await;
        f.pipeline.create_rule(rule_to_n2()).await.unwrap();

        f.objects
            .objects
            .lock()
            .extend([test_object("t1", "photos", "a.jpg", 100), test_object("t1", "photos", "b.jpg", 200)]);

        f.pipeline.scheduler_cycle().await.unwrap();
        let (pending, _, _, _) = f.store.queue_counts().await.unwrap();
        assert_eq!(pending, 2);

        // Second pass: the rule is not due yet, nothing new
        f.pipeline.scheduler_cycle().await.unwrap();
        let (pending, _, _, _) = f.store.queue_counts().await.unwrap();
        assert_eq!(pending, 2);

        let rules = f.store.list_rules().await.unwrap();
        assert!(rules[0].last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_scheduler_honors_prefix() {
        let f = fixture().await;
        let mut rule = rule_to_n2();
        rule.prefix = Some("logs/".to_string());
        f.pipeline.create_rule(rule).await.unwrap();

        f.objects.objects.lock().extend([
            test_object("t1", "photos", "logs/a.log", 10),
            test_object("t1", "photos", "data/b.bin", 10),
        ]);

        f.pipeline.scheduler_cycle().await.unwrap();
        let pending = f.store.fetch_pending_items(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].object_key, "logs/a.log");
    }

    #[tokio::test]
    async fn test_delete_propagation_requires_flag() {
        let f = fixture().await;

        let without = rule_to_n2();
        f.pipeline.create_rule(without).await.unwrap();
        assert_eq!(
            f.pipeline
                .notify_object_deleted("t1", "photos", "a.jpg")
                .await
                .unwrap(),
            0
        );

        let mut with = ReplicationRule::new("t1", "videos", "n2", "videos");
        with.sync_interval_seconds = 60;
        with.replicate_deletes = true;
        f.pipeline.create_rule(with).await.unwrap();
        assert_eq!(
            f.pipeline
                .notify_object_deleted("t1", "videos", "v.mp4")
                .await
                .unwrap(),
            1
        );

        let items = f.store.fetch_pending_items(10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].operation, QueueOperation::Delete);
    }

    #[tokio::test]
    async fn test_failed_push_returns_item_to_pending() {
        let f = fixture().await;
        let rule = f.pipeline.create_rule(rule_to_n2()).await.unwrap();

        f.objects
            .objects
            .lock()
            .push(test_object("t1", "photos", "a.jpg", 100));
        f.pipeline.scheduler_cycle().await.unwrap();

        let items = f.store.fetch_pending_items(1).await.unwrap();
        // The blob is missing from the stub store, so execution fails
        assert!(f.pipeline.process_item(&items[0]).await.is_err());

        let retry = f.store.fetch_pending_items(1).await.unwrap();
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].attempts, 1);
        assert_eq!(retry[0].rule_id, rule.id);
    }

    #[tokio::test]
    async fn test_claimed_item_is_not_reprocessed() {
        let f = fixture().await;
        f.pipeline.create_rule(rule_to_n2()).await.unwrap();
        f.objects
            .objects
            .lock()
            .push(test_object("t1", "photos", "a.jpg", 100));
        f.pipeline.scheduler_cycle().await.unwrap();

        let items = f.store.fetch_pending_items(1).await.unwrap();
        assert!(f.store.mark_item_processing(&items[0].id).await.unwrap());

        // A duplicate delivery sees the claim and backs off cleanly
        assert!(f.pipeline.process_item(&items[0]).await.is_ok());
    }
}
