//! Contracts consumed from external collaborators
//!
//! The control plane does not own blobs, buckets, objects or directory
//! records; it reaches them through these traits. Production wires the
//! real services in, tests pass stubs.

use async_trait::async_trait;
use sahab_core::types::{
    AccessKey, BucketAcl, BucketConfig, BucketInfo, BucketPermission, EntityKind, GroupMapping,
    IdpProvider, ObjectInfo, Tenant, User,
};
use sahab_core::Result;
use tokio::io::AsyncRead;

/// Streaming reader handed out by the storage backend; closed on drop.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Opaque blob storage backend.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open `path` for reading, returning the stream and its size.
    async fn get(&self, path: &str) -> Result<(ObjectReader, u64)>;

    /// Write `size` bytes from `reader` to `path`.
    async fn put(&self, path: &str, reader: ObjectReader, size: u64) -> Result<()>;
}

/// Storage path for an object, shared by the replication and migration
/// paths so both sides resolve the same blob.
pub fn object_path(tenant_id: &str, bucket: &str, key: &str) -> String {
    format!("{}/{}/{}", tenant_id, bucket, key)
}

/// Bucket catalog: local CRUD for bucket records and their configuration.
#[async_trait]
pub trait BucketCatalog: Send + Sync {
    async fn get_bucket_info(&self, tenant_id: &str, bucket: &str) -> Result<Option<BucketInfo>>;

    /// Persist an updated bucket record, including its metadata map.
    async fn update_bucket(&self, tenant_id: &str, bucket: &str, info: &BucketInfo) -> Result<()>;

    /// Buckets visible locally, optionally restricted to one tenant.
    async fn list_buckets(&self, tenant_id: Option<&str>) -> Result<Vec<BucketInfo>>;

    async fn get_bucket_config(&self, tenant_id: &str, bucket: &str) -> Result<BucketConfig>;

    /// Apply configuration received from a migrating peer.
    async fn apply_bucket_config(
        &self,
        tenant_id: &str,
        bucket: &str,
        config: &BucketConfig,
    ) -> Result<()>;
}

/// ACL manager, optional collaborator.
#[async_trait]
pub trait AclManager: Send + Sync {
    async fn get_bucket_acl(&self, tenant_id: &str, bucket: &str) -> Result<Option<BucketAcl>>;

    async fn apply_bucket_acl(&self, tenant_id: &str, bucket: &str, acl: &BucketAcl) -> Result<()>;
}

/// Object catalog: indexed queries over live (non-deleted) objects.
#[async_trait]
pub trait ObjectCatalog: Send + Sync {
    /// `(count, total_bytes)` of live objects in the bucket.
    async fn count_objects(&self, tenant_id: &str, bucket: &str) -> Result<(i64, i64)>;

    async fn list_live_objects(
        &self,
        tenant_id: &str,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectInfo>>;

    async fn get_object_info(
        &self,
        tenant_id: &str,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectInfo>>;

    /// Register an object received from a peer.
    async fn record_object(&self, info: &ObjectInfo) -> Result<()>;

    async fn delete_object(&self, tenant_id: &str, bucket: &str, key: &str) -> Result<bool>;
}

/// Directory catalog: the tenant/user/credential/permission/IDP records the
/// sync engines scan on the source side and apply on the receiving side.
#[async_trait]
pub trait DirectoryCatalog: Send + Sync {
    async fn list_tenants(&self) -> Result<Vec<Tenant>>;
    async fn list_users(&self) -> Result<Vec<User>>;
    async fn list_access_keys(&self) -> Result<Vec<AccessKey>>;
    async fn list_bucket_permissions(&self) -> Result<Vec<BucketPermission>>;
    async fn list_idp_providers(&self) -> Result<Vec<IdpProvider>>;
    async fn list_group_mappings(&self) -> Result<Vec<GroupMapping>>;

    /// Permissions for one bucket, used by the migration engine.
    async fn bucket_permissions_for(
        &self,
        tenant_id: &str,
        bucket: &str,
    ) -> Result<Vec<BucketPermission>>;

    /// Local storage consumption for one tenant.
    async fn tenant_storage_bytes(&self, tenant_id: &str) -> Result<u64>;

    async fn apply_tenant(&self, tenant: &Tenant) -> Result<()>;
    async fn apply_user(&self, user: &User) -> Result<()>;
    async fn apply_access_key(&self, key: &AccessKey) -> Result<()>;
    async fn apply_bucket_permission(&self, permission: &BucketPermission) -> Result<()>;
    async fn apply_idp_provider(&self, provider: &IdpProvider) -> Result<()>;
    async fn apply_group_mapping(&self, mapping: &GroupMapping) -> Result<()>;

    /// Remove the named entity if it still exists. Returns whether a row
    /// was deleted.
    async fn delete_entity(&self, kind: EntityKind, entity_id: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_path() {
        assert_eq!(object_path("t1", "photos", "a/b.jpg"), "t1/photos/a/b.jpg");
    }
}
