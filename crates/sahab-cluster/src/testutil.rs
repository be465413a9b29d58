//! Shared stubs for engine tests

use std::collections::{HashMap, HashSet};
use std::io::Cursor;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use sahab_core::types::{
    AccessKey, BucketConfig, BucketInfo, BucketPermission, EntityKind, GroupMapping, HealthStatus,
    IdpProvider, Node, ObjectInfo, Tenant, User,
};
use sahab_core::Result;
use sahab_metadata::{BucketCatalog, DirectoryCatalog, ObjectCatalog, ObjectReader, ObjectStore};

use crate::error::ClusterResult;
use crate::manager::ClusterView;

pub fn test_tenant(id: &str) -> Tenant {
    Tenant {
        id: id.to_string(),
        name: format!("tenant-{}", id),
        display_name: None,
        max_storage_bytes: 0,
        current_storage_bytes: 0,
        enabled: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn test_object(tenant: &str, bucket: &str, key: &str, size: i64) -> ObjectInfo {
    ObjectInfo {
        tenant_id: tenant.to_string(),
        bucket: bucket.to_string(),
        key: key.to_string(),
        size,
        etag: format!("etag-{}", key),
        content_type: "application/octet-stream".to_string(),
        version_id: None,
        metadata: HashMap::new(),
        last_modified: Utc::now(),
    }
}

/// ClusterView stub with a configurable peer list. Peer endpoints point at
/// a closed local port so any real push fails fast.
#[derive(Default)]
pub struct StubView {
    pub peers: Vec<Node>,
}

impl StubView {
    pub fn with_peers(names: Vec<&str>) -> Self {
        let peers = names
            .into_iter()
            .map(|name| {
                let mut node = Node::new(name, "http://127.0.0.1:1", "peer-token".to_string());
                node.id = name.to_string();
                node.health_status = HealthStatus::Healthy;
                node
            })
            .collect();
        Self { peers }
    }
}

#[async_trait]
impl ClusterView for StubView {
    async fn healthy_nodes(&self) -> ClusterResult<Vec<Node>> {
        Ok(self.peers.clone())
    }

    async fn local_node_id(&self) -> ClusterResult<String> {
        Ok("local-node".to_string())
    }

    async fn local_node_token(&self) -> ClusterResult<String> {
        Ok("local-token".to_string())
    }
}

/// Directory catalog stub that records deletions.
#[derive(Default)]
pub struct StubCatalog {
    pub tenants: Mutex<Vec<Tenant>>,
    pub permissions: Mutex<Vec<BucketPermission>>,
    existing: Mutex<HashSet<String>>,
    deleted_log: Mutex<Vec<String>>,
}

impl StubCatalog {
    pub fn seed_entity(&self, entity_id: &str) {
        self.existing.lock().insert(entity_id.to_string());
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted_log.lock().clone()
    }
}

#[async_trait]
impl DirectoryCatalog for StubCatalog {
    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        Ok(self.tenants.lock().clone())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(Vec::new())
    }

    async fn list_access_keys(&self) -> Result<Vec<AccessKey>> {
        Ok(Vec::new())
    }

    async fn list_bucket_permissions(&self) -> Result<Vec<BucketPermission>> {
        Ok(self.permissions.lock().clone())
    }

    async fn list_idp_providers(&self) -> Result<Vec<IdpProvider>> {
        Ok(Vec::new())
    }

    async fn list_group_mappings(&self) -> Result<Vec<GroupMapping>> {
        Ok(Vec::new())
    }

    async fn bucket_permissions_for(
        &self,
        tenant_id: &str,
        bucket: &str,
    ) -> Result<Vec<BucketPermission>> {
        Ok(self
            .permissions
            .lock()
            .iter()
            .filter(|p| p.tenant_id == tenant_id && p.bucket_name == bucket)
            .cloned()
            .collect())
    }

    async fn tenant_storage_bytes(&self, _tenant_id: &str) -> Result<u64> {
        Ok(0)
    }

    async fn apply_tenant(&self, _tenant: &Tenant) -> Result<()> {
        Ok(())
    }

    async fn apply_user(&self, _user: &User) -> Result<()> {
        Ok(())
    }

    async fn apply_access_key(&self, _key: &AccessKey) -> Result<()> {
        Ok(())
    }

    async fn apply_bucket_permission(&self, _permission: &BucketPermission) -> Result<()> {
        Ok(())
    }

    async fn apply_idp_provider(&self, _provider: &IdpProvider) -> Result<()> {
        Ok(())
    }

    async fn apply_group_mapping(&self, _mapping: &GroupMapping) -> Result<()> {
        Ok(())
    }

    async fn delete_entity(&self, kind: EntityKind, entity_id: &str) -> Result<bool> {
        self.deleted_log
            .lock()
            .push(format!("{}:{}", kind.as_str(), entity_id));
        Ok(self.existing.lock().remove(entity_id))
    }
}

/// Bucket catalog stub with in-memory bucket records.
#[derive(Default)]
pub struct StubBucketCatalog {
    pub buckets: Mutex<HashMap<(String, String), BucketInfo>>,
    pub config: Mutex<BucketConfig>,
}

impl StubBucketCatalog {
    pub fn seed_bucket(&self, info: BucketInfo) {
        self.buckets
            .lock()
            .insert((info.tenant_id.clone(), info.name.clone()), info);
    }

    pub fn location_of(&self, tenant_id: &str, bucket: &str) -> Option<String> {
        self.buckets
            .lock()
            .get(&(tenant_id.to_string(), bucket.to_string()))
            .and_then(|b| b.location().map(String::from))
    }
}

#[async_trait]
impl BucketCatalog for StubBucketCatalog {
    async fn get_bucket_info(&self, tenant_id: &str, bucket: &str) -> Result<Option<BucketInfo>> {
        Ok(self
            .buckets
            .lock()
            .get(&(tenant_id.to_string(), bucket.to_string()))
            .cloned())
    }

    async fn update_bucket(&self, tenant_id: &str, bucket: &str, info: &BucketInfo) -> Result<()> {
        self.buckets
            .lock()
            .insert((tenant_id.to_string(), bucket.to_string()), info.clone());
        Ok(())
    }

    async fn list_buckets(&self, tenant_id: Option<&str>) -> Result<Vec<BucketInfo>> {
        Ok(self
            .buckets
            .lock()
            .values()
            .filter(|b| tenant_id.map(|t| b.tenant_id == t).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn get_bucket_config(&self, _tenant_id: &str, _bucket: &str) -> Result<BucketConfig> {
        Ok(self.config.lock().clone())
    }

    async fn apply_bucket_config(
        &self,
        _tenant_id: &str,
        _bucket: &str,
        config: &BucketConfig,
    ) -> Result<()> {
        *self.config.lock() = config.clone();
        Ok(())
    }
}

/// Object catalog stub.
#[derive(Default)]
pub struct StubObjectCatalog {
    pub objects: Mutex<Vec<ObjectInfo>>,
}

#[async_trait]
impl ObjectCatalog for StubObjectCatalog {
    async fn count_objects(&self, tenant_id: &str, bucket: &str) -> Result<(i64, i64)> {
        let objects = self.objects.lock();
        let matching: Vec<_> = objects
            .iter()
            .filter(|o| o.tenant_id == tenant_id && o.bucket == bucket)
            .collect();
        let bytes = matching.iter().map(|o| o.size).sum();
        Ok((matching.len() as i64, bytes))
    }

    async fn list_live_objects(
        &self,
        tenant_id: &str,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectInfo>> {
        Ok(self
            .objects
            .lock()
            .iter()
            .filter(|o| {
                o.tenant_id == tenant_id
                    && o.bucket == bucket
                    && prefix.map(|p| o.key.starts_with(p)).unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn get_object_info(
        &self,
        tenant_id: &str,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectInfo>> {
        Ok(self
            .objects
            .lock()
            .iter()
            .find(|o| o.tenant_id == tenant_id && o.bucket == bucket && o.key == key)
            .cloned())
    }

    async fn record_object(&self, info: &ObjectInfo) -> Result<()> {
        self.objects.lock().push(info.clone());
        Ok(())
    }

    async fn delete_object(&self, tenant_id: &str, bucket: &str, key: &str) -> Result<bool> {
        let mut objects = self.objects.lock();
        let before = objects.len();
        objects.retain(|o| !(o.tenant_id == tenant_id && o.bucket == bucket && o.key == key));
        Ok(objects.len() < before)
    }
}

/// In-memory blob store stub.
#[derive(Default)]
pub struct StubObjectStore {
    pub blobs: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ObjectStore for StubObjectStore {
    async fn get(&self, path: &str) -> Result<(ObjectReader, u64)> {
        let blobs = self.blobs.lock();
        let data = blobs
            .get(path)
            .cloned()
            .ok_or_else(|| sahab_core::Error::StorageError(format!("no such blob: {}", path)))?;
        let size = data.len() as u64;
        Ok((Box::new(Cursor::new(data)), size))
    }

    async fn put(&self, path: &str, mut reader: ObjectReader, _size: u64) -> Result<()> {
        use tokio::io::AsyncReadExt;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        self.blobs.lock().insert(path.to_string(), data);
        Ok(())
    }
}

