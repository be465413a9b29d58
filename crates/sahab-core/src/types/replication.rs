//! Bucket replication types
//!
//! A rule directs objects from (tenant, source bucket) to a destination
//! bucket on another node at a fixed interval. Work is queued as one item
//! per object key and drained by the worker pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::NodeId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationRule {
    pub id: String,
    pub tenant_id: String,
    pub source_bucket: String,
    pub destination_node_id: NodeId,
    pub destination_bucket: String,
    pub sync_interval_seconds: i64,
    pub enabled: bool,
    pub replicate_deletes: bool,
    pub replicate_metadata: bool,
    pub prefix: Option<String>,
    /// Higher priority rules are scheduled first
    pub priority: i32,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub objects_synced: i64,
    pub bytes_synced: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReplicationRule {
    pub fn new(
        tenant_id: impl Into<String>,
        source_bucket: impl Into<String>,
        destination_node_id: impl Into<String>,
        destination_bucket: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            source_bucket: source_bucket.into(),
            destination_node_id: destination_node_id.into(),
            destination_bucket: destination_bucket.into(),
            sync_interval_seconds: 300,
            enabled: true,
            replicate_deletes: false,
            replicate_metadata: true,
            prefix: None,
            priority: 0,
            last_sync_at: None,
            objects_synced: 0,
            bytes_synced: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the rule is due for another scheduling pass.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_sync_at {
            None => true,
            Some(last) => (now - last).num_seconds() >= self.sync_interval_seconds,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueOperation {
    #[serde(rename = "PUT")]
    Put,
    #[serde(rename = "DELETE")]
    Delete,
}

impl QueueOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueOperation::Put => "PUT",
            QueueOperation::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PUT" => Some(QueueOperation::Put),
            "DELETE" => Some(QueueOperation::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "pending",
            QueueItemStatus::Processing => "processing",
            QueueItemStatus::Completed => "completed",
            QueueItemStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueItemStatus::Pending),
            "processing" => Some(QueueItemStatus::Processing),
            "completed" => Some(QueueItemStatus::Completed),
            "failed" => Some(QueueItemStatus::Failed),
            _ => None,
        }
    }

    /// Pending and processing items block re-enqueueing of the same key.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueItemStatus::Completed | QueueItemStatus::Failed)
    }
}

/// One unit of replication work: PUT or DELETE of a single object key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationQueueItem {
    pub id: String,
    pub rule_id: String,
    pub tenant_id: String,
    pub source_bucket: String,
    pub object_key: String,
    pub destination_node_id: NodeId,
    pub destination_bucket: String,
    pub operation: QueueOperation,
    pub status: QueueItemStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub priority: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReplicationQueueItem {
    pub fn from_rule(rule: &ReplicationRule, object_key: impl Into<String>, operation: QueueOperation) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            tenant_id: rule.tenant_id.clone(),
            source_bucket: rule.source_bucket.clone(),
            object_key: object_key.into(),
            destination_node_id: rule.destination_node_id.clone(),
            destination_bucket: rule.destination_bucket.clone(),
            operation,
            status: QueueItemStatus::Pending,
            attempts: 0,
            max_attempts: 3,
            priority: rule.priority,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-(rule, key) replication outcome (`cluster_replication_status`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationObjectStatus {
    pub rule_id: String,
    pub object_key: String,
    pub source_version_id: Option<String>,
    pub destination_version_id: Option<String>,
    pub source_etag: Option<String>,
    pub destination_etag: Option<String>,
    pub source_size: i64,
    pub destination_size: i64,
    pub status: String,
    pub last_sync_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_rule_is_due() {
        let mut rule = ReplicationRule::new("t1", "photos", "node-2", "photos");
        rule.sync_interval_seconds = 60;

        let now = Utc::now();
        assert!(rule.is_due(now));

        rule.last_sync_at = Some(now - Duration::seconds(30));
        assert!(!rule.is_due(now));

        rule.last_sync_at = Some(now - Duration::seconds(61));
        assert!(rule.is_due(now));
    }

    #[test]
    fn test_operation_serde() {
        let json = serde_json::to_string(&QueueOperation::Put).unwrap();
        assert_eq!(json, "\"PUT\"");
        assert_eq!(QueueOperation::parse("DELETE"), Some(QueueOperation::Delete));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!QueueItemStatus::Pending.is_terminal());
        assert!(!QueueItemStatus::Processing.is_terminal());
        assert!(QueueItemStatus::Completed.is_terminal());
        assert!(QueueItemStatus::Failed.is_terminal());
    }
}
