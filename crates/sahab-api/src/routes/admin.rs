//! Operator endpoints
//!
//! Cluster administration under `/api/v1/cluster`: initialization, node
//! CRUD, replication rules, migrations and observability snapshots. The
//! front-end gateway is expected to authenticate operators before these
//! routes are reachable.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use sahab_cluster::{
    AddNodeRequest, ClusterError, ClusterView, MigrationJob, MigrationRequest, Node,
};
use sahab_core::types::{ClusterStatus, EntityKind, HealthSample, ReplicationRule, SyncStatus};

use super::{ApiError, ApiResult};
use crate::server::AppState;

// ============= Cluster Lifecycle =============

#[derive(Debug, Deserialize)]
pub struct InitializeRequest {
    pub node_name: String,
    pub region: String,
}

/// The cluster token is returned exactly once, at initialization.
#[derive(Debug, Serialize)]
pub struct InitializeResponse {
    pub node_id: String,
    pub node_name: String,
    pub region: String,
    pub cluster_token: String,
}

/// POST /api/v1/cluster/initialize
pub async fn initialize(
    State(state): State<AppState>,
    Json(request): Json<InitializeRequest>,
) -> ApiResult<(StatusCode, Json<InitializeResponse>)> {
    let config = state
        .manager
        .initialize_cluster(&request.node_name, &request.region)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InitializeResponse {
            node_id: config.node_id,
            node_name: config.node_name,
            region: config.region,
            cluster_token: config.cluster_token,
        }),
    ))
}

/// POST /api/v1/cluster/enable
pub async fn enable(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    state.manager.set_enabled(true).await?;
    Ok(Json(serde_json::json!({"enabled": true})))
}

/// POST /api/v1/cluster/disable
pub async fn disable(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    state.manager.set_enabled(false).await?;
    Ok(Json(serde_json::json!({"enabled": false})))
}

/// GET /api/v1/cluster/status
pub async fn cluster_status(State(state): State<AppState>) -> ApiResult<Json<ClusterStatus>> {
    Ok(Json(state.manager.cluster_status().await?))
}

/// GET /api/v1/cluster/stats
pub async fn cluster_stats(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let (pending, processing, completed, failed) = state
        .store
        .queue_counts()
        .await
        .map_err(ClusterError::Metadata)?;

    Ok(Json(serde_json::json!({
        "metrics": state.cluster_metrics.snapshot(),
        "circuit_breakers": state.breakers.stats(),
        "rate_limiter": state.limiter.stats(),
        "location_cache": state.cache.stats(),
        "replication_queue": {
            "pending": pending,
            "processing": processing,
            "completed": completed,
            "failed": failed,
        },
    })))
}

// ============= Nodes =============

#[derive(Debug, Serialize)]
pub struct NodesListResponse {
    pub nodes: Vec<Node>,
    pub total: usize,
    pub healthy: usize,
}

/// POST /api/v1/cluster/nodes
pub async fn add_node(
    State(state): State<AppState>,
    Json(request): Json<AddNodeRequest>,
) -> ApiResult<(StatusCode, Json<Node>)> {
    let node = state.manager.add_node(request).await?;
    Ok((StatusCode::CREATED, Json(node)))
}

/// GET /api/v1/cluster/nodes
pub async fn list_nodes(State(state): State<AppState>) -> ApiResult<Json<NodesListResponse>> {
    let nodes = state.manager.list_nodes().await?;
    let healthy = nodes.iter().filter(|n| n.is_healthy()).count();
    let total = nodes.len();
    Ok(Json(NodesListResponse {
        nodes,
        total,
        healthy,
    }))
}

/// GET /api/v1/cluster/nodes/{node_id}
pub async fn get_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<Node>> {
    let node = state
        .manager
        .get_node(&node_id)
        .await?
        .ok_or(ClusterError::NodeNotFound(node_id))?;
    Ok(Json(node))
}

/// DELETE /api/v1/cluster/nodes/{node_id}
pub async fn remove_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> ApiResult<StatusCode> {
    let local_id = state.manager.local_node_id().await.unwrap_or_default();
    if node_id == local_id {
        return Err(ApiError(ClusterError::Validation(
            "cannot remove the local node".into(),
        )));
    }
    state.manager.remove_node(&node_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

/// GET /api/v1/cluster/nodes/{node_id}/health-history
pub async fn node_health_history(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<HealthSample>>> {
    let samples = state
        .store
        .list_health_samples(&node_id, query.limit.unwrap_or(100).clamp(1, 1000))
        .await
        .map_err(ClusterError::Metadata)?;
    Ok(Json(samples))
}

// ============= Sync Status =============

/// GET /api/v1/cluster/sync/{kind}/status
pub async fn sync_status(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<SyncStatus>>> {
    let kind = EntityKind::parse(&kind)
        .ok_or_else(|| ClusterError::Validation(format!("unknown entity kind: {}", kind)))?;
    let rows = state
        .store
        .list_sync_status(kind, query.limit.unwrap_or(200).clamp(1, 2000))
        .await
        .map_err(ClusterError::Metadata)?;
    Ok(Json(rows))
}

// ============= Replication Rules =============

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub tenant_id: String,
    pub source_bucket: String,
    pub destination_node_id: String,
    pub destination_bucket: Option<String>,
    pub sync_interval_seconds: Option<i64>,
    pub replicate_deletes: Option<bool>,
    pub replicate_metadata: Option<bool>,
    pub prefix: Option<String>,
    pub priority: Option<i32>,
    pub enabled: Option<bool>,
}

/// POST /api/v1/cluster/replication/rules
pub async fn create_rule(
    State(state): State<AppState>,
    Json(request): Json<CreateRuleRequest>,
) -> ApiResult<(StatusCode, Json<ReplicationRule>)> {
    let mut rule = ReplicationRule::new(
        request.tenant_id,
        request.source_bucket,
        request.destination_node_id,
        request.destination_bucket.unwrap_or_default(),
    );
    if let Some(interval) = request.sync_interval_seconds {
        rule.sync_interval_seconds = interval;
    }
    if let Some(replicate_deletes) = request.replicate_deletes {
        rule.replicate_deletes = replicate_deletes;
    }
    if let Some(replicate_metadata) = request.replicate_metadata {
        rule.replicate_metadata = replicate_metadata;
    }
    if let Some(prefix) = request.prefix {
        rule.prefix = Some(prefix);
    }
    if let Some(priority) = request.priority {
        rule.priority = priority;
    }
    if let Some(enabled) = request.enabled {
        rule.enabled = enabled;
    }

    let rule = state.replication.create_rule(rule).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

#[derive(Debug, Serialize)]
pub struct RulesResponse {
    pub rules: Vec<ReplicationRule>,
    pub total: usize,
}

/// GET /api/v1/cluster/replication/rules
pub async fn list_rules(State(state): State<AppState>) -> ApiResult<Json<RulesResponse>> {
    let rules = state.replication.list_rules().await?;
    let total = rules.len();
    Ok(Json(RulesResponse { rules, total }))
}

/// DELETE /api/v1/cluster/replication/rules/{rule_id}
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.replication.delete_rule(&rule_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============= Migrations =============

/// POST /api/v1/cluster/migrations
pub async fn create_migration(
    State(state): State<AppState>,
    Json(request): Json<MigrationRequest>,
) -> ApiResult<(StatusCode, Json<MigrationJob>)> {
    let job = state.migration.migrate_bucket(request).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

#[derive(Debug, Deserialize)]
pub struct MigrationsQuery {
    pub limit: Option<i64>,
}

/// GET /api/v1/cluster/migrations
pub async fn list_migrations(
    State(state): State<AppState>,
    Query(query): Query<MigrationsQuery>,
) -> ApiResult<Json<Vec<MigrationJob>>> {
    let jobs = state
        .migration
        .list_migrations(query.limit.unwrap_or(50).clamp(1, 500))
        .await?;
    Ok(Json(jobs))
}

/// GET /api/v1/cluster/migrations/{job_id}
pub async fn get_migration(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<MigrationJob>> {
    let job = state
        .migration
        .get_migration(&job_id)
        .await?
        .ok_or_else(|| ClusterError::Metadata(sahab_core::Error::MigrationNotFound(job_id)))?;
    Ok(Json(job))
}

/// POST /api/v1/cluster/migrations/{job_id}/cancel
pub async fn cancel_migration(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.migration.cancel_migration(&job_id).await?;
    Ok(Json(serde_json::json!({"cancelled": true, "job_id": job_id})))
}
