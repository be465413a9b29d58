//! Internal peer-to-peer endpoints
//!
//! Everything under `/api/internal/cluster`, reached only through the
//! rate limiter and the envelope verifier. Handlers hand off to the
//! catalog services and the tombstone log.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use futures::TryStreamExt;
use serde::Deserialize;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use sahab_cluster::envelope::{
    HEADER_OBJECT_ETAG, HEADER_OBJECT_METADATA, HEADER_OBJECT_SIZE, HEADER_SOURCE_VERSION_ID,
};
use sahab_cluster::{BucketsResponse, ClusterError, HealthResponse, SyncAck, Tombstone};
use sahab_core::types::{
    AccessKey, BucketAcl, BucketConfig, BucketPermission, EntityKind, GroupMapping, IdpProvider,
    ObjectInfo, Tenant, TenantUsage, User,
};
use sahab_metadata::object_path;

use super::ApiResult;
use crate::server::AppState;

fn ack() -> Json<SyncAck> {
    Json(SyncAck { success: true })
}

// ============= Health & Aggregation Sources =============

/// GET /api/internal/cluster/health
pub async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let node_id = state
        .store
        .get_local_config()
        .await
        .map_err(ClusterError::Metadata)?
        .map(|c| c.node_id)
        .unwrap_or_else(|| "uninitialized".to_string());

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        node_id,
    }))
}

/// GET /api/internal/cluster/tenant/{tenant_id}/storage
pub async fn tenant_storage(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<TenantUsage>> {
    let bytes = state.directory.tenant_storage_bytes(&tenant_id).await?;
    let local = state
        .store
        .get_local_config()
        .await
        .map_err(ClusterError::Metadata)?;

    Ok(Json(TenantUsage {
        tenant_id,
        current_storage_bytes: bytes,
        node_id: local.as_ref().map(|c| c.node_id.clone()).unwrap_or_default(),
        node_name: local.map(|c| c.node_name).unwrap_or_default(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct BucketsQuery {
    pub tenant_id: Option<String>,
}

/// GET /api/internal/cluster/buckets?tenant_id=…
pub async fn list_buckets(
    State(state): State<AppState>,
    Query(query): Query<BucketsQuery>,
) -> ApiResult<Json<BucketsResponse>> {
    let buckets = state
        .buckets
        .list_buckets(query.tenant_id.as_deref())
        .await?;
    Ok(Json(BucketsResponse { buckets }))
}

// ============= Entity Sync =============

/// POST /api/internal/cluster/tenant-sync
pub async fn tenant_sync(
    State(state): State<AppState>,
    Json(tenant): Json<Tenant>,
) -> ApiResult<Json<SyncAck>> {
    debug!(tenant_id = %tenant.id, "Applying tenant sync");
    state.directory.apply_tenant(&tenant).await?;
    Ok(ack())
}

/// POST /api/internal/cluster/user-sync
pub async fn user_sync(
    State(state): State<AppState>,
    Json(user): Json<User>,
) -> ApiResult<Json<SyncAck>> {
    debug!(user_id = %user.id, "Applying user sync");
    state.directory.apply_user(&user).await?;
    Ok(ack())
}

/// POST /api/internal/cluster/access-key-sync
pub async fn access_key_sync(
    State(state): State<AppState>,
    Json(key): Json<AccessKey>,
) -> ApiResult<Json<SyncAck>> {
    debug!(access_key_id = %key.access_key_id, "Applying access key sync");
    state.directory.apply_access_key(&key).await?;
    Ok(ack())
}

/// POST /api/internal/cluster/bucket-permission-sync
pub async fn bucket_permission_sync(
    State(state): State<AppState>,
    Json(permission): Json<BucketPermission>,
) -> ApiResult<Json<SyncAck>> {
    state.directory.apply_bucket_permission(&permission).await?;
    Ok(ack())
}

/// POST /api/internal/cluster/idp-provider-sync
pub async fn idp_provider_sync(
    State(state): State<AppState>,
    Json(provider): Json<IdpProvider>,
) -> ApiResult<Json<SyncAck>> {
    state.directory.apply_idp_provider(&provider).await?;
    Ok(ack())
}

/// POST /api/internal/cluster/group-mapping-sync
pub async fn group_mapping_sync(
    State(state): State<AppState>,
    Json(mapping): Json<GroupMapping>,
) -> ApiResult<Json<SyncAck>> {
    state.directory.apply_group_mapping(&mapping).await?;
    Ok(ack())
}

#[derive(Debug, Deserialize)]
pub struct IdBody {
    pub id: String,
}

/// POST /api/internal/cluster/idp-provider-delete-sync
pub async fn idp_provider_delete_sync(
    State(state): State<AppState>,
    Json(body): Json<IdBody>,
) -> ApiResult<Json<SyncAck>> {
    state
        .directory
        .delete_entity(EntityKind::IdpProvider, &body.id)
        .await?;
    Ok(ack())
}

/// POST /api/internal/cluster/deletion-log-sync
pub async fn deletion_log_sync(
    State(state): State<AppState>,
    Json(entries): Json<Vec<Tombstone>>,
) -> ApiResult<Json<SyncAck>> {
    let deleted = state.tombstones.apply_entries(&entries).await?;
    debug!(entries = entries.len(), deleted, "Deletion log applied");
    Ok(ack())
}

// ============= Object Transfer =============

/// PUT /api/internal/cluster/objects/{tenant}/{bucket}/{*key}
pub async fn put_object(
    State(state): State<AppState>,
    Path((tenant_id, bucket, key)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Response> {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };

    let size: u64 = header_str(HEADER_OBJECT_SIZE)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let etag = header_str(HEADER_OBJECT_ETAG).unwrap_or_default();
    let content_type = header_str("content-type")
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let metadata = header_str(HEADER_OBJECT_METADATA)
        .and_then(|blob| serde_json::from_str(&blob).ok())
        .unwrap_or_default();
    let version_id = header_str(HEADER_SOURCE_VERSION_ID);

    let stream = body
        .into_data_stream()
        .map_err(|e| std::io::Error::other(e.to_string()));
    let reader = StreamReader::new(stream);
    state
        .blobs
        .put(&object_path(&tenant_id, &bucket, &key), Box::new(reader), size)
        .await?;

    state
        .objects
        .record_object(&ObjectInfo {
            tenant_id: tenant_id.clone(),
            bucket: bucket.clone(),
            key: key.clone(),
            size: size as i64,
            etag: etag.clone(),
            content_type,
            version_id,
            metadata,
            last_modified: Utc::now(),
        })
        .await?;

    debug!(%tenant_id, %bucket, %key, size, "Object received");
    let mut response = StatusCode::CREATED.into_response();
    if !etag.is_empty() {
        if let Ok(value) = etag.parse() {
            response.headers_mut().insert(HEADER_OBJECT_ETAG, value);
        }
    }
    Ok(response)
}

/// DELETE /api/internal/cluster/objects/{tenant}/{bucket}/{*key}
pub async fn delete_object(
    State(state): State<AppState>,
    Path((tenant_id, bucket, key)): Path<(String, String, String)>,
) -> ApiResult<Json<SyncAck>> {
    let removed = state.objects.delete_object(&tenant_id, &bucket, &key).await?;
    if !removed {
        debug!(%tenant_id, %bucket, %key, "Delete for absent object");
    }
    Ok(ack())
}

/// HEAD /api/internal/cluster/objects/{tenant}/{bucket}/{*key}
pub async fn head_object(
    State(state): State<AppState>,
    Path((tenant_id, bucket, key)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let Some(object) = state.objects.get_object_info(&tenant_id, &bucket, &key).await? else {
        return Ok(super::error_response(
            StatusCode::NOT_FOUND,
            &format!("no such object: {}/{}", bucket, key),
        ));
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(HEADER_OBJECT_SIZE, object.size.to_string())
        .header(HEADER_OBJECT_ETAG, object.etag.clone())
        .header("ETag", format!("\"{}\"", object.etag))
        .header("Content-Type", object.content_type);
    if let Some(version_id) = object.version_id {
        builder = builder.header(HEADER_SOURCE_VERSION_ID, version_id);
    }

    Ok(builder
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}

// ============= Migration Ingest =============

/// POST /api/internal/cluster/bucket-permissions
pub async fn receive_bucket_permission(
    State(state): State<AppState>,
    Json(permission): Json<BucketPermission>,
) -> ApiResult<(StatusCode, Json<SyncAck>)> {
    state.directory.apply_bucket_permission(&permission).await?;
    Ok((StatusCode::CREATED, ack()))
}

#[derive(Debug, Deserialize)]
pub struct AclBody {
    pub tenant_id: String,
    pub bucket_name: String,
    pub acl: BucketAcl,
}

/// POST /api/internal/cluster/bucket-acl
pub async fn receive_bucket_acl(
    State(state): State<AppState>,
    Json(body): Json<AclBody>,
) -> ApiResult<Json<SyncAck>> {
    match &state.acl {
        Some(acl_manager) => {
            acl_manager
                .apply_bucket_acl(&body.tenant_id, &body.bucket_name, &body.acl)
                .await?;
        }
        None => {
            warn!(bucket = %body.bucket_name, "No ACL manager registered, ACL dropped");
        }
    }
    Ok(ack())
}

#[derive(Debug, Deserialize)]
pub struct BucketConfigBody {
    pub tenant_id: String,
    pub bucket_name: String,
    #[serde(flatten)]
    pub config: BucketConfig,
}

/// POST /api/internal/cluster/bucket-config
pub async fn receive_bucket_config(
    State(state): State<AppState>,
    Json(body): Json<BucketConfigBody>,
) -> ApiResult<Json<SyncAck>> {
    state
        .buckets
        .apply_bucket_config(&body.tenant_id, &body.bucket_name, &body.config)
        .await?;
    Ok(ack())
}
