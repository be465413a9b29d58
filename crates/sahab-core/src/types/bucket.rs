//! Bucket, object and usage types consumed from the catalog services

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{HealthStatus, NodeId};

/// Bucket record as exposed by the bucket catalog.
///
/// `metadata` is a free-form map; the control plane only interprets the
/// `cluster:location` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    pub tenant_id: String,
    pub owner_id: Option<String>,
    pub object_count: i64,
    pub size_bytes: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl BucketInfo {
    /// Home node id from `cluster:location` metadata, if set.
    pub fn location(&self) -> Option<&str> {
        self.metadata
            .get(crate::LOCATION_METADATA_KEY)
            .map(String::as_str)
    }
}

/// A bucket annotated with the node it was listed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketWithLocation {
    #[serde(flatten)]
    pub bucket: BucketInfo,
    pub node_id: NodeId,
    pub node_name: String,
    pub node_status: HealthStatus,
}

/// Canned ACL plus explicit grants for a bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketAcl {
    pub canned_acl: String,
    #[serde(default)]
    pub grants: Vec<AclGrant>,
}

impl BucketAcl {
    /// The default ACL carries no information worth shipping to a peer.
    pub fn is_default(&self) -> bool {
        self.canned_acl == "private" && self.grants.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclGrant {
    pub grantee: String,
    pub permission: String,
}

/// Per-bucket configuration shipped during migration. Absent sections are
/// omitted from the wire body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versioning: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_lock: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<serde_json::Value>,
}

impl BucketConfig {
    pub fn is_empty(&self) -> bool {
        self.versioning.is_none()
            && self.object_lock.is_none()
            && self.encryption.is_none()
            && self.lifecycle.is_none()
            && self.tags.is_none()
            && self.cors.is_none()
            && self.policy.is_none()
            && self.notification.is_none()
    }
}

/// A live object as listed by the object catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub tenant_id: String,
    pub bucket: String,
    pub key: String,
    pub size: i64,
    pub etag: String,
    pub content_type: String,
    pub version_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub last_modified: DateTime<Utc>,
}

/// Per-tenant storage usage reported by one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantUsage {
    pub tenant_id: String,
    pub current_storage_bytes: u64,
    pub node_id: NodeId,
    pub node_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_location() {
        let mut bucket = BucketInfo {
            name: "photos".into(),
            tenant_id: "t1".into(),
            owner_id: None,
            object_count: 0,
            size_bytes: 0,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        };
        assert_eq!(bucket.location(), None);

        bucket
            .metadata
            .insert(crate::LOCATION_METADATA_KEY.to_string(), "node-2".to_string());
        assert_eq!(bucket.location(), Some("node-2"));
    }

    #[test]
    fn test_default_acl() {
        let acl = BucketAcl {
            canned_acl: "private".into(),
            grants: vec![],
        };
        assert!(acl.is_default());

        let acl = BucketAcl {
            canned_acl: "public-read".into(),
            grants: vec![],
        };
        assert!(!acl.is_default());
    }

    #[test]
    fn test_bucket_config_omits_absent_sections() {
        let config = BucketConfig {
            versioning: Some(serde_json::json!({"status": "Enabled"})),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("versioning"));
        assert!(!json.contains("lifecycle"));
    }
}
