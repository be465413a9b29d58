//! Bucket migration engine
//!
//! Moves a bucket's home location to another node in stages: inventory,
//! object copy, permissions, ACL, configuration, optional verification,
//! then the location flip. Per-object copy errors are tolerated up to a
//! threshold; jobs are never retried automatically.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use sahab_core::types::{
    BucketAcl, BucketConfig, MigrationJob, MigrationRequest, MigrationState, Node, ObjectInfo,
};
use sahab_core::LOCATION_METADATA_KEY;
use sahab_metadata::{
    object_path, AclManager, BucketCatalog, ClusterStore, DirectoryCatalog, ObjectCatalog,
    ObjectStore,
};

use crate::cache::LocationCache;
use crate::envelope;
use crate::error::{ClusterError, ClusterResult};
use crate::manager::ClusterView;
use crate::transport::{NodeClient, RequestIdentity};

/// Per-object copy failures tolerated before the job fails.
const MAX_OBJECT_ERRORS: usize = 10;
/// Progress is persisted every this many copied objects.
const PROGRESS_BATCH: i64 = 10;
/// Objects spot-checked by HEAD during verification.
const VERIFY_SAMPLE: usize = 10;

#[derive(Debug, Serialize)]
struct AclSyncBody<'a> {
    tenant_id: &'a str,
    bucket_name: &'a str,
    acl: &'a BucketAcl,
}

#[derive(Debug, Serialize)]
struct BucketConfigBody<'a> {
    tenant_id: &'a str,
    bucket_name: &'a str,
    #[serde(flatten)]
    config: &'a BucketConfig,
}

pub struct MigrationEngine {
    store: Arc<ClusterStore>,
    view: Arc<dyn ClusterView>,
    transport: Arc<NodeClient>,
    object_store: Arc<dyn ObjectStore>,
    object_catalog: Arc<dyn ObjectCatalog>,
    bucket_catalog: Arc<dyn BucketCatalog>,
    directory: Arc<dyn DirectoryCatalog>,
    acl_manager: Option<Arc<dyn AclManager>>,
    cache: Arc<LocationCache>,
}

impl MigrationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ClusterStore>,
        view: Arc<dyn ClusterView>,
        transport: Arc<NodeClient>,
        object_store: Arc<dyn ObjectStore>,
        object_catalog: Arc<dyn ObjectCatalog>,
        bucket_catalog: Arc<dyn BucketCatalog>,
        directory: Arc<dyn DirectoryCatalog>,
        acl_manager: Option<Arc<dyn AclManager>>,
        cache: Arc<LocationCache>,
    ) -> Self {
        Self {
            store,
            view,
            transport,
            object_store,
            object_catalog,
            bucket_catalog,
            directory,
            acl_manager,
            cache,
        }
    }

    /// Resolve the bucket's current home: location cache first, bucket
    /// metadata second, the local node as the default.
    async fn resolve_source(&self, tenant_id: &str, bucket: &str) -> ClusterResult<String> {
        if let Some(node_id) = self.cache.get(bucket) {
            return Ok(node_id);
        }

        if let Some(info) = self.bucket_catalog.get_bucket_info(tenant_id, bucket).await? {
            if let Some(node_id) = info.location() {
                self.cache.set(bucket, node_id);
                return Ok(node_id.to_string());
            }
        }

        self.view.local_node_id().await
    }

    /// Validate and start a migration. The job runs in the background; the
    /// returned snapshot is in `pending`.
    pub async fn migrate_bucket(
        self: &Arc<Self>,
        request: MigrationRequest,
    ) -> ClusterResult<MigrationJob> {
        let job = self.create_job(request).await?;

        let engine = Arc::clone(self);
        let spawned = job.clone();
        tokio::spawn(async move {
            engine.execute_job(&spawned).await;
        });

        Ok(job)
    }

    /// Validate a request and persist the job in `pending` without
    /// running it.
    pub async fn create_job(&self, request: MigrationRequest) -> ClusterResult<MigrationJob> {
        let source_node_id = self
            .resolve_source(&request.tenant_id, &request.bucket_name)
            .await?;

        if source_node_id == request.target_node_id {
            return Err(ClusterError::Validation(
                "source and target nodes are identical".into(),
            ));
        }

        let source = self
            .store
            .get_node(&source_node_id)
            .await?
            .ok_or_else(|| ClusterError::NodeNotFound(source_node_id.clone()))?;
        let target = self
            .store
            .get_node(&request.target_node_id)
            .await?
            .ok_or_else(|| ClusterError::NodeNotFound(request.target_node_id.clone()))?;

        if !source.is_healthy() {
            return Err(ClusterError::Validation(format!(
                "source node {} is not healthy",
                source.id
            )));
        }
        if !target.is_healthy() {
            return Err(ClusterError::Validation(format!(
                "target node {} is not healthy",
                target.id
            )));
        }

        let job = MigrationJob::new(&request, source_node_id);
        self.store.create_migration(&job).await?;
        info!(job_id = %job.id, bucket = %job.bucket_name, target = %target.id,
              "Migration created");
        Ok(job)
    }

    /// Run a created job to its terminal state.
    pub async fn execute_job(&self, job: &MigrationJob) {
        if let Err(e) = self.store.set_migration_running(&job.id).await {
            error!(job_id = %job.id, "Failed to start migration: {}", e);
            return;
        }

        match self.run_steps(job).await {
            Ok(()) => {
                if let Err(e) = self
                    .store
                    .finish_migration(&job.id, MigrationState::Completed, None)
                    .await
                {
                    error!(job_id = %job.id, "Failed to record completion: {}", e);
                }
                info!(job_id = %job.id, bucket = %job.bucket_name, "Migration completed");
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(e) = self
                    .store
                    .finish_migration(&job.id, MigrationState::Failed, Some(&message))
                    .await
                {
                    error!(job_id = %job.id, "Failed to record failure: {}", e);
                }
                error!(job_id = %job.id, bucket = %job.bucket_name, "Migration failed: {}", message);
            }
        }
    }

    async fn run_steps(&self, job: &MigrationJob) -> ClusterResult<()> {
        let identity = self.view.identity().await?;
        let target = self
            .store
            .get_node(&job.target_node_id)
            .await?
            .ok_or_else(|| ClusterError::NodeNotFound(job.target_node_id.clone()))?;

        // Step A: inventory
        let (objects_total, bytes_total) = self
            .object_catalog
            .count_objects(&job.tenant_id, &job.bucket_name)
            .await?;
        self.store
            .set_migration_totals(&job.id, objects_total, bytes_total)
            .await?;

        // Step B: copy
        let objects = self
            .object_catalog
            .list_live_objects(&job.tenant_id, &job.bucket_name, None)
            .await?;
        let (objects_migrated, bytes_migrated) = if objects_total > 0 {
            self.copy_objects(job, &identity, &target, &objects).await?
        } else {
            (0, 0)
        };

        // Step C: bucket permissions
        let permissions = self
            .directory
            .bucket_permissions_for(&job.tenant_id, &job.bucket_name)
            .await?;
        for permission in &permissions {
            let _: serde_json::Value = self
                .transport
                .post_json(
                    &identity,
                    &target,
                    "/api/internal/cluster/bucket-permissions",
                    permission,
                    self.transport.config().sync_timeout,
                )
                .await?;
        }
        if !permissions.is_empty() {
            debug!(job_id = %job.id, count = permissions.len(), "Permissions migrated");
        }

        // Step D: ACL, skipped when no manager is wired or the ACL carries
        // no information
        if let Some(acl_manager) = &self.acl_manager {
            if let Some(acl) = acl_manager
                .get_bucket_acl(&job.tenant_id, &job.bucket_name)
                .await?
            {
                if !acl.is_default() {
                    let body = AclSyncBody {
                        tenant_id: &job.tenant_id,
                        bucket_name: &job.bucket_name,
                        acl: &acl,
                    };
                    let _: serde_json::Value = self
                        .transport
                        .post_json(
                            &identity,
                            &target,
                            "/api/internal/cluster/bucket-acl",
                            &body,
                            self.transport.config().sync_timeout,
                        )
                        .await?;
                }
            }
        }

        // Step E: bucket configuration
        let config = self
            .bucket_catalog
            .get_bucket_config(&job.tenant_id, &job.bucket_name)
            .await?;
        if !config.is_empty() {
            let body = BucketConfigBody {
                tenant_id: &job.tenant_id,
                bucket_name: &job.bucket_name,
                config: &config,
            };
            let _: serde_json::Value = self
                .transport
                .post_json(
                    &identity,
                    &target,
                    "/api/internal/cluster/bucket-config",
                    &body,
                    self.transport.config().sync_timeout,
                )
                .await?;
        }

        // Step F: verification
        if job.verify_data && objects_total > 0 {
            verify_counts(objects_total, objects_migrated, bytes_total, bytes_migrated)
                .map_err(ClusterError::VerificationFailed)?;
            self.verify_sample(job, &identity, &target, &objects).await?;
        }

        // Step G: flip the location pointer and invalidate the cache
        let mut info = self
            .bucket_catalog
            .get_bucket_info(&job.tenant_id, &job.bucket_name)
            .await?
            .ok_or_else(|| {
                ClusterError::Metadata(sahab_core::Error::BucketNotFound(job.bucket_name.clone()))
            })?;
        info.metadata
            .insert(LOCATION_METADATA_KEY.to_string(), job.target_node_id.clone());
        self.bucket_catalog
            .update_bucket(&job.tenant_id, &job.bucket_name, &info)
            .await?;
        self.cache.delete(&job.bucket_name);

        // Step H: source cleanup stays a scheduled follow-up
        if job.delete_source {
            info!(job_id = %job.id, bucket = %job.bucket_name, source = %job.source_node_id,
                  "Source cleanup scheduled");
        }

        Ok(())
    }

    async fn copy_objects(
        &self,
        job: &MigrationJob,
        identity: &RequestIdentity,
        target: &Node,
        objects: &[ObjectInfo],
    ) -> ClusterResult<(i64, i64)> {
        let mut migrated: i64 = 0;
        let mut bytes: i64 = 0;
        let mut errors: usize = 0;

        for object in objects {
            match self.copy_object(job, identity, target, object).await {
                Ok(size) => {
                    migrated += 1;
                    bytes += size;
                    if migrated % PROGRESS_BATCH == 0 {
                        self.store
                            .set_migration_progress(&job.id, migrated, bytes)
                            .await?;
                    }
                }
                Err(e) => {
                    errors += 1;
                    warn!(job_id = %job.id, key = %object.key,
                          "Object copy failed ({}/{}): {}", errors, MAX_OBJECT_ERRORS, e);
                    if errors > MAX_OBJECT_ERRORS {
                        self.store
                            .set_migration_progress(&job.id, migrated, bytes)
                            .await?;
                        return Err(ClusterError::MigrationFailed(format!(
                            "aborted after {} object copy errors",
                            errors
                        )));
                    }
                }
            }
        }

        self.store
            .set_migration_progress(&job.id, migrated, bytes)
            .await?;
        Ok((migrated, bytes))
    }

    async fn copy_object(
        &self,
        job: &MigrationJob,
        identity: &RequestIdentity,
        target: &Node,
        object: &ObjectInfo,
    ) -> ClusterResult<i64> {
        let (reader, size) = self
            .object_store
            .get(&object_path(&job.tenant_id, &job.bucket_name, &object.key))
            .await?;

        let mut headers = vec![
            (envelope::HEADER_OBJECT_SIZE.to_string(), size.to_string()),
            (envelope::HEADER_OBJECT_ETAG.to_string(), object.etag.clone()),
            (
                http::header::CONTENT_TYPE.to_string(),
                object.content_type.clone(),
            ),
        ];
        if !object.metadata.is_empty() {
            headers.push((
                envelope::HEADER_OBJECT_METADATA.to_string(),
                serde_json::to_string(&object.metadata)?,
            ));
        }
        if let Some(version_id) = &object.version_id {
            headers.push((
                envelope::HEADER_SOURCE_VERSION_ID.to_string(),
                version_id.clone(),
            ));
        }

        self.transport
            .put_object(
                identity,
                target,
                &object_endpoint(&job.tenant_id, &job.bucket_name, &object.key),
                reqwest::Body::wrap_stream(ReaderStream::new(reader)),
                headers,
            )
            .await?;

        Ok(size as i64)
    }

    /// HEAD the first few objects on the target and compare etags.
    async fn verify_sample(
        &self,
        job: &MigrationJob,
        identity: &RequestIdentity,
        target: &Node,
        objects: &[ObjectInfo],
    ) -> ClusterResult<()> {
        for object in objects.iter().take(VERIFY_SAMPLE) {
            let headers = self
                .transport
                .head(
                    identity,
                    target,
                    &object_endpoint(&job.tenant_id, &job.bucket_name, &object.key),
                    self.transport.config().aggregate_timeout,
                )
                .await?;

            let remote_etag = headers
                .get(envelope::HEADER_OBJECT_ETAG)
                .or_else(|| headers.get(http::header::ETAG))
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim_matches('"'))
                .unwrap_or_default();

            if remote_etag != object.etag.trim_matches('"') {
                return Err(ClusterError::VerificationFailed(format!(
                    "etag mismatch for {}: local {} remote {}",
                    object.key, object.etag, remote_etag
                )));
            }
        }
        Ok(())
    }

    // ============= Job Queries =============

    pub async fn get_migration(&self, job_id: &str) -> ClusterResult<Option<MigrationJob>> {
        Ok(self.store.get_migration(job_id).await?)
    }

    pub async fn list_migrations(&self, limit: i64) -> ClusterResult<Vec<MigrationJob>> {
        Ok(self.store.list_migrations(limit).await?)
    }

    /// Cancel a job that has not started running yet.
    pub async fn cancel_migration(&self, job_id: &str) -> ClusterResult<()> {
        let job = self
            .store
            .get_migration(job_id)
            .await?
            .ok_or_else(|| ClusterError::Metadata(sahab_core::Error::MigrationNotFound(job_id.to_string())))?;

        if job.status != MigrationState::Pending {
            return Err(ClusterError::Conflict(format!(
                "migration {} is {}, only pending jobs can be cancelled",
                job_id,
                job.status.as_str()
            )));
        }

        self.store
            .finish_migration(job_id, MigrationState::Cancelled, None)
            .await?;
        Ok(())
    }
}

fn object_endpoint(tenant_id: &str, bucket: &str, key: &str) -> String {
    format!("/api/internal/cluster/objects/{}/{}/{}", tenant_id, bucket, key)
}

/// Count and byte-drift checks of the verification step.
fn verify_counts(
    objects_total: i64,
    objects_migrated: i64,
    bytes_total: i64,
    bytes_migrated: i64,
) -> Result<(), String> {
    if objects_migrated != objects_total {
        return Err(format!(
            "object count mismatch: migrated {} but expected {}",
            objects_migrated, objects_total
        ));
    }
    if bytes_total > 0 {
        let drift = (bytes_total - bytes_migrated).abs() as f64 / bytes_total as f64;
        if drift > 0.01 {
            return Err(format!(
                "byte count drift {:.2}% exceeds tolerance",
                drift * 100.0
            ));
        }
    }
    Ok(())
}
