//! Bucket migration types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl MigrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationState::Pending => "pending",
            MigrationState::InProgress => "in_progress",
            MigrationState::Completed => "completed",
            MigrationState::Failed => "failed",
            MigrationState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MigrationState::Pending),
            "in_progress" => Some(MigrationState::InProgress),
            "completed" => Some(MigrationState::Completed),
            "failed" => Some(MigrationState::Failed),
            "cancelled" => Some(MigrationState::Cancelled),
            _ => None,
        }
    }
}

/// A bucket migration job (`cluster_migrations`).
///
/// State transitions are monotonic: pending → in_progress → one of
/// completed/failed/cancelled. Jobs are never retried automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationJob {
    pub id: String,
    pub tenant_id: String,
    pub bucket_name: String,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub status: MigrationState,
    pub objects_total: i64,
    pub objects_migrated: i64,
    pub bytes_total: i64,
    pub bytes_migrated: i64,
    pub delete_source: bool,
    pub verify_data: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationJob {
    pub fn new(request: &MigrationRequest, source_node_id: NodeId) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: request.tenant_id.clone(),
            bucket_name: request.bucket_name.clone(),
            source_node_id,
            target_node_id: request.target_node_id.clone(),
            status: MigrationState::Pending,
            objects_total: 0,
            objects_migrated: 0,
            bytes_total: 0,
            bytes_migrated: 0,
            delete_source: request.delete_source,
            verify_data: request.verify_data,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Operator request to move a bucket's home location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRequest {
    pub tenant_id: String,
    pub bucket_name: String,
    pub target_node_id: NodeId,
    #[serde(default)]
    pub delete_source: bool,
    #[serde(default = "default_verify")]
    pub verify_data: bool,
}

fn default_verify() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip() {
        for state in [
            MigrationState::Pending,
            MigrationState::InProgress,
            MigrationState::Completed,
            MigrationState::Failed,
            MigrationState::Cancelled,
        ] {
            assert_eq!(MigrationState::parse(state.as_str()), Some(state));
        }
    }

    #[test]
    fn test_request_defaults() {
        let req: MigrationRequest = serde_json::from_str(
            r#"{"tenant_id":"t1","bucket_name":"b1","target_node_id":"n2"}"#,
        )
        .unwrap();
        assert!(!req.delete_source);
        assert!(req.verify_data);
    }
}
