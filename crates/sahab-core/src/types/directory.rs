//! Directory entities replicated between peers
//!
//! These are the tenant/user/credential/permission/IDP records whose
//! authoritative CRUD lives in the catalog services; the control plane only
//! scans, checksums and ships them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of entities tracked by the sync engines and the tombstone log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Tenant,
    User,
    AccessKey,
    BucketPermission,
    IdpProvider,
    GroupMapping,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Tenant,
        EntityKind::User,
        EntityKind::AccessKey,
        EntityKind::BucketPermission,
        EntityKind::IdpProvider,
        EntityKind::GroupMapping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Tenant => "tenant",
            EntityKind::User => "user",
            EntityKind::AccessKey => "access_key",
            EntityKind::BucketPermission => "bucket_permission",
            EntityKind::IdpProvider => "idp_provider",
            EntityKind::GroupMapping => "group_mapping",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tenant" => Some(EntityKind::Tenant),
            "user" => Some(EntityKind::User),
            "access_key" => Some(EntityKind::AccessKey),
            "bucket_permission" => Some(EntityKind::BucketPermission),
            "idp_provider" => Some(EntityKind::IdpProvider),
            "group_mapping" => Some(EntityKind::GroupMapping),
            _ => None,
        }
    }

    /// Name of the per-kind sync status table.
    pub fn sync_table(&self) -> &'static str {
        match self {
            EntityKind::Tenant => "cluster_tenant_sync",
            EntityKind::User => "cluster_user_sync",
            EntityKind::AccessKey => "cluster_access_key_sync",
            EntityKind::BucketPermission => "cluster_bucket_permission_sync",
            EntityKind::IdpProvider => "cluster_idp_provider_sync",
            EntityKind::GroupMapping => "cluster_group_mapping_sync",
        }
    }

    /// Internal endpoint path the full record is pushed to.
    pub fn sync_endpoint(&self) -> &'static str {
        match self {
            EntityKind::Tenant => "/api/internal/cluster/tenant-sync",
            EntityKind::User => "/api/internal/cluster/user-sync",
            EntityKind::AccessKey => "/api/internal/cluster/access-key-sync",
            EntityKind::BucketPermission => "/api/internal/cluster/bucket-permission-sync",
            EntityKind::IdpProvider => "/api/internal/cluster/idp-provider-sync",
            EntityKind::GroupMapping => "/api/internal/cluster/group-mapping-sync",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub display_name: Option<String>,
    pub max_storage_bytes: i64,
    pub current_storage_bytes: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub tenant_id: String,
    pub username: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessKey {
    pub access_key_id: String,
    pub secret_key: String,
    pub user_id: String,
    pub tenant_id: String,
    pub enabled: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketPermission {
    pub id: String,
    pub tenant_id: String,
    pub bucket_name: String,
    pub user_id: String,
    /// read / write / admin
    pub permission: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpProvider {
    pub id: String,
    pub name: String,
    pub provider_type: String,
    /// Opaque provider configuration, carried verbatim
    pub config_json: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMapping {
    pub id: String,
    pub provider_id: String,
    pub group_name: String,
    pub role: String,
    pub tenant_id: String,
    pub created_at: DateTime<Utc>,
}

/// Per-(entity, destination) sync bookkeeping row.
///
/// The checksum is the last value successfully pushed to the destination;
/// the engines skip a push when the current checksum matches it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub entity_id: String,
    pub destination_node_id: String,
    pub source_node_id: String,
    pub checksum: String,
    pub status: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_roundtrip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityKind::parse("bucket"), None);
    }

    #[test]
    fn test_sync_tables_are_distinct() {
        let tables: std::collections::HashSet<_> =
            EntityKind::ALL.iter().map(|k| k.sync_table()).collect();
        assert_eq!(tables.len(), EntityKind::ALL.len());
    }
}
