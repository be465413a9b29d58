//! Reference catalog
//!
//! SQLite-backed implementation of the collaborator traits, used by the
//! standalone node binary and by tests. A production deployment replaces
//! this with the real tenant/bucket/object services.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

use sahab_core::types::{
    AccessKey, BucketAcl, BucketConfig, BucketInfo, BucketPermission, EntityKind, GroupMapping,
    IdpProvider, ObjectInfo, Tenant, User,
};
use sahab_core::{Error, Result};

use crate::traits::{AclManager, BucketCatalog, DirectoryCatalog, ObjectCatalog};

fn to_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(|v| parse_ts(v))
}

pub struct LocalCatalog {
    pool: SqlitePool,
}

impl LocalCatalog {
    pub async fn new(database_url: &str) -> Result<Self> {
        let max_connections = if database_url.contains(":memory:") { 1 } else { 32 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

        let catalog = Self { pool };
        catalog.init().await?;
        Ok(catalog)
    }

    async fn init(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                display_name TEXT,
                max_storage_bytes INTEGER NOT NULL DEFAULT 0,
                current_storage_bytes INTEGER NOT NULL DEFAULT 0,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                username TEXT NOT NULL,
                email TEXT,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'member',
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS access_keys (
                access_key_id TEXT PRIMARY KEY,
                secret_key TEXT NOT NULL,
                user_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                expires_at TEXT,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS bucket_permissions (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                bucket_name TEXT NOT NULL,
                user_id TEXT NOT NULL,
                permission TEXT NOT NULL,
                expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS idp_providers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                provider_type TEXT NOT NULL,
                config_json TEXT NOT NULL DEFAULT '{}',
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS group_mappings (
                id TEXT PRIMARY KEY,
                provider_id TEXT NOT NULL,
                group_name TEXT NOT NULL,
                role TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS buckets (
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                owner_id TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                config TEXT NOT NULL DEFAULT '{}',
                acl TEXT,
                created_at TEXT NOT NULL,
                PRIMARY KEY (tenant_id, name)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS objects (
                tenant_id TEXT NOT NULL,
                bucket TEXT NOT NULL,
                key TEXT NOT NULL,
                size INTEGER NOT NULL DEFAULT 0,
                etag TEXT NOT NULL DEFAULT '',
                content_type TEXT NOT NULL DEFAULT 'application/octet-stream',
                version_id TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                last_modified TEXT NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (tenant_id, bucket, key)
            )
            "#,
            r#"CREATE INDEX IF NOT EXISTS idx_objects_bucket ON objects(tenant_id, bucket, deleted)"#,
            r#"CREATE INDEX IF NOT EXISTS idx_permissions_bucket ON bucket_permissions(tenant_id, bucket_name)"#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::DatabaseError(e.to_string()))?;
        }

        info!("Reference catalog initialized");
        Ok(())
    }
}

type TenantRow = (
    String,
    String,
    Option<String>,
    i64,
    i64,
    i64,
    String,
    String,
);

fn tenant_from_row(r: TenantRow) -> Tenant {
    Tenant {
        id: r.0,
        name: r.1,
        display_name: r.2,
        max_storage_bytes: r.3,
        current_storage_bytes: r.4,
        enabled: r.5 != 0,
        created_at: parse_ts(&r.6),
        updated_at: parse_ts(&r.7),
    }
}

type PermissionRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
);

fn permission_from_row(r: PermissionRow) -> BucketPermission {
    BucketPermission {
        id: r.0,
        tenant_id: r.1,
        bucket_name: r.2,
        user_id: r.3,
        permission: r.4,
        expires_at: parse_opt_ts(r.5),
        created_at: parse_ts(&r.6),
        updated_at: parse_ts(&r.7),
    }
}

type BucketRow = (
    String,         // tenant_id
    String,         // name
    Option<String>, // owner_id
    String,         // metadata
    String,         // created_at
    i64,            // object_count
    i64,            // size_bytes
);

fn bucket_from_row(r: BucketRow) -> BucketInfo {
    BucketInfo {
        tenant_id: r.0,
        name: r.1,
        owner_id: r.2,
        metadata: serde_json::from_str(&r.3).unwrap_or_default(),
        created_at: parse_ts(&r.4),
        object_count: r.5,
        size_bytes: r.6,
    }
}

const BUCKET_SELECT: &str = r#"
    SELECT b.tenant_id, b.name, b.owner_id, b.metadata, b.created_at,
           COALESCE((SELECT COUNT(*) FROM objects o
                     WHERE o.tenant_id = b.tenant_id AND o.bucket = b.name AND o.deleted = 0), 0),
           COALESCE((SELECT SUM(o.size) FROM objects o
                     WHERE o.tenant_id = b.tenant_id AND o.bucket = b.name AND o.deleted = 0), 0)
    FROM buckets b
"#;

type ObjectRow = (
    String,
    String,
    String,
    i64,
    String,
    String,
    Option<String>,
    String,
    String,
);

fn object_from_row(r: ObjectRow) -> ObjectInfo {
    ObjectInfo {
        tenant_id: r.0,
        bucket: r.1,
        key: r.2,
        size: r.3,
        etag: r.4,
        content_type: r.5,
        version_id: r.6,
        metadata: serde_json::from_str(&r.7).unwrap_or_default(),
        last_modified: parse_ts(&r.8),
    }
}

const OBJECT_SELECT: &str = r#"
    SELECT tenant_id, bucket, key, size, etag, content_type, version_id, metadata, last_modified
    FROM objects
"#;

#[async_trait]
impl DirectoryCatalog for LocalCatalog {
    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let rows: Vec<TenantRow> = sqlx::query_as(
            r#"
            SELECT id, name, display_name, max_storage_bytes, current_storage_bytes,
                   enabled, created_at, updated_at
            FROM tenants ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(rows.into_iter().map(tenant_from_row).collect())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let rows: Vec<(
            String,
            String,
            String,
            Option<String>,
            String,
            String,
            i64,
            String,
            String,
        )> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, username, email, password_hash, role, enabled, created_at, updated_at
            FROM users ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|r| User {
                id: r.0,
                tenant_id: r.1,
                username: r.2,
                email: r.3,
                password_hash: r.4,
                role: r.5,
                enabled: r.6 != 0,
                created_at: parse_ts(&r.7),
                updated_at: parse_ts(&r.8),
            })
            .collect())
    }

    async fn list_access_keys(&self) -> Result<Vec<AccessKey>> {
        let rows: Vec<(String, String, String, String, i64, Option<String>, String)> =
            sqlx::query_as(
                r#"
                SELECT access_key_id, secret_key, user_id, tenant_id, enabled, expires_at, created_at
                FROM access_keys ORDER BY access_key_id
                "#,
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|r| AccessKey {
                access_key_id: r.0,
                secret_key: r.1,
                user_id: r.2,
                tenant_id: r.3,
                enabled: r.4 != 0,
                expires_at: parse_opt_ts(r.5),
                created_at: parse_ts(&r.6),
            })
            .collect())
    }

    async fn list_bucket_permissions(&self) -> Result<Vec<BucketPermission>> {
        let rows: Vec<PermissionRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, bucket_name, user_id, permission, expires_at, created_at, updated_at
            FROM bucket_permissions ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(rows.into_iter().map(permission_from_row).collect())
    }

    async fn list_idp_providers(&self) -> Result<Vec<IdpProvider>> {
        let rows: Vec<(String, String, String, String, i64, String, String)> = sqlx::query_as(
            r#"
            SELECT id, name, provider_type, config_json, enabled, created_at, updated_at
            FROM idp_providers ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|r| IdpProvider {
                id: r.0,
                name: r.1,
                provider_type: r.2,
                config_json: r.3,
                enabled: r.4 != 0,
                created_at: parse_ts(&r.5),
                updated_at: parse_ts(&r.6),
            })
            .collect())
    }

    async fn list_group_mappings(&self) -> Result<Vec<GroupMapping>> {
        let rows: Vec<(String, String, String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT id, provider_id, group_name, role, tenant_id, created_at
            FROM group_mappings ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|r| GroupMapping {
                id: r.0,
                provider_id: r.1,
                group_name: r.2,
                role: r.3,
                tenant_id: r.4,
                created_at: parse_ts(&r.5),
            })
            .collect())
    }

    async fn bucket_permissions_for(
        &self,
        tenant_id: &str,
        bucket: &str,
    ) -> Result<Vec<BucketPermission>> {
        let rows: Vec<PermissionRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, bucket_name, user_id, permission, expires_at, created_at, updated_at
            FROM bucket_permissions
            WHERE tenant_id = ? AND bucket_name = ?
            "#,
        )
        .bind(tenant_id)
        .bind(bucket)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(rows.into_iter().map(permission_from_row).collect())
    }

    async fn tenant_storage_bytes(&self, tenant_id: &str) -> Result<u64> {
        let row: (Option<i64>,) = sqlx::query_as(
            r#"SELECT SUM(size) FROM objects WHERE tenant_id = ? AND deleted = 0"#,
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(row.0.unwrap_or(0).max(0) as u64)
    }

    async fn apply_tenant(&self, tenant: &Tenant) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO tenants
                (id, name, display_name, max_storage_bytes, current_storage_bytes, enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.display_name)
        .bind(tenant.max_storage_bytes)
        .bind(tenant.current_storage_bytes)
        .bind(tenant.enabled as i64)
        .bind(to_ts(tenant.created_at))
        .bind(to_ts(tenant.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn apply_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO users
                (id, tenant_id, username, email, password_hash, role, enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.tenant_id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.role)
        .bind(user.enabled as i64)
        .bind(to_ts(user.created_at))
        .bind(to_ts(user.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn apply_access_key(&self, key: &AccessKey) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO access_keys
                (access_key_id, secret_key, user_id, tenant_id, enabled, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&key.access_key_id)
        .bind(&key.secret_key)
        .bind(&key.user_id)
        .bind(&key.tenant_id)
        .bind(key.enabled as i64)
        .bind(key.expires_at.map(to_ts))
        .bind(to_ts(key.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn apply_bucket_permission(&self, permission: &BucketPermission) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO bucket_permissions
                (id, tenant_id, bucket_name, user_id, permission, expires_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&permission.id)
        .bind(&permission.tenant_id)
        .bind(&permission.bucket_name)
        .bind(&permission.user_id)
        .bind(&permission.permission)
        .bind(permission.expires_at.map(to_ts))
        .bind(to_ts(permission.created_at))
        .bind(to_ts(permission.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn apply_idp_provider(&self, provider: &IdpProvider) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO idp_providers
                (id, name, provider_type, config_json, enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&provider.id)
        .bind(&provider.name)
        .bind(&provider.provider_type)
        .bind(&provider.config_json)
        .bind(provider.enabled as i64)
        .bind(to_ts(provider.created_at))
        .bind(to_ts(provider.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn apply_group_mapping(&self, mapping: &GroupMapping) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO group_mappings
                (id, provider_id, group_name, role, tenant_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&mapping.id)
        .bind(&mapping.provider_id)
        .bind(&mapping.group_name)
        .bind(&mapping.role)
        .bind(&mapping.tenant_id)
        .bind(to_ts(mapping.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn delete_entity(&self, kind: EntityKind, entity_id: &str) -> Result<bool> {
        let (table, key_column) = match kind {
            EntityKind::Tenant => ("tenants", "id"),
            EntityKind::User => ("users", "id"),
            EntityKind::AccessKey => ("access_keys", "access_key_id"),
            EntityKind::BucketPermission => ("bucket_permissions", "id"),
            EntityKind::IdpProvider => ("idp_providers", "id"),
            EntityKind::GroupMapping => ("group_mappings", "id"),
        };

        let result = sqlx::query(&format!("DELETE FROM {} WHERE {} = ?", table, key_column))
            .bind(entity_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl BucketCatalog for LocalCatalog {
    async fn get_bucket_info(&self, tenant_id: &str, bucket: &str) -> Result<Option<BucketInfo>> {
        let row: Option<BucketRow> = sqlx::query_as(&format!(
            "{} WHERE b.tenant_id = ? AND b.name = ?",
            BUCKET_SELECT
        ))
        .bind(tenant_id)
        .bind(bucket)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(row.map(bucket_from_row))
    }

    async fn update_bucket(&self, tenant_id: &str, bucket: &str, info: &BucketInfo) -> Result<()> {
        let metadata = serde_json::to_string(&info.metadata)
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO buckets (tenant_id, name, owner_id, metadata, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id, name) DO UPDATE SET
                owner_id = excluded.owner_id,
                metadata = excluded.metadata
            "#,
        )
        .bind(tenant_id)
        .bind(bucket)
        .bind(&info.owner_id)
        .bind(metadata)
        .bind(to_ts(info.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn list_buckets(&self, tenant_id: Option<&str>) -> Result<Vec<BucketInfo>> {
        let rows: Vec<BucketRow> = match tenant_id {
            Some(tenant) => sqlx::query_as(&format!(
                "{} WHERE b.tenant_id = ? ORDER BY b.name",
                BUCKET_SELECT
            ))
            .bind(tenant)
            .fetch_all(&self.pool)
            .await,
            None => {
                sqlx::query_as(&format!("{} ORDER BY b.name", BUCKET_SELECT))
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(rows.into_iter().map(bucket_from_row).collect())
    }

    async fn get_bucket_config(&self, tenant_id: &str, bucket: &str) -> Result<BucketConfig> {
        let row: Option<(String,)> =
            sqlx::query_as(r#"SELECT config FROM buckets WHERE tenant_id = ? AND name = ?"#)
                .bind(tenant_id)
                .bind(bucket)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(row
            .and_then(|r| serde_json::from_str(&r.0).ok())
            .unwrap_or_default())
    }

    async fn apply_bucket_config(
        &self,
        tenant_id: &str,
        bucket: &str,
        config: &BucketConfig,
    ) -> Result<()> {
        let blob =
            serde_json::to_string(config).map_err(|e| Error::DatabaseError(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO buckets (tenant_id, name, metadata, config, created_at)
            VALUES (?, ?, '{}', ?, ?)
            ON CONFLICT(tenant_id, name) DO UPDATE SET config = excluded.config
            "#,
        )
        .bind(tenant_id)
        .bind(bucket)
        .bind(blob)
        .bind(to_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectCatalog for LocalCatalog {
    async fn count_objects(&self, tenant_id: &str, bucket: &str) -> Result<(i64, i64)> {
        let row: (i64, Option<i64>) = sqlx::query_as(
            r#"
            SELECT COUNT(*), SUM(size) FROM objects
            WHERE tenant_id = ? AND bucket = ? AND deleted = 0
            "#,
        )
        .bind(tenant_id)
        .bind(bucket)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok((row.0, row.1.unwrap_or(0)))
    }

    async fn list_live_objects(
        &self,
        tenant_id: &str,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectInfo>> {
        let rows: Vec<ObjectRow> = match prefix {
            Some(prefix) => {
                let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
                sqlx::query_as(&format!(
                    r#"{} WHERE tenant_id = ? AND bucket = ? AND deleted = 0
                       AND key LIKE ? ESCAPE '\' ORDER BY key"#,
                    OBJECT_SELECT
                ))
                .bind(tenant_id)
                .bind(bucket)
                .bind(pattern)
                .fetch_all(&self.pool)
                .await
            }
            None => sqlx::query_as(&format!(
                "{} WHERE tenant_id = ? AND bucket = ? AND deleted = 0 ORDER BY key",
                OBJECT_SELECT
            ))
            .bind(tenant_id)
            .bind(bucket)
            .fetch_all(&self.pool)
            .await,
        }
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(rows.into_iter().map(object_from_row).collect())
    }

    async fn get_object_info(
        &self,
        tenant_id: &str,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectInfo>> {
        let row: Option<ObjectRow> = sqlx::query_as(&format!(
            "{} WHERE tenant_id = ? AND bucket = ? AND key = ? AND deleted = 0",
            OBJECT_SELECT
        ))
        .bind(tenant_id)
        .bind(bucket)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(row.map(object_from_row))
    }

    async fn record_object(&self, info: &ObjectInfo) -> Result<()> {
        let metadata = serde_json::to_string(&info.metadata)
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO objects
                (tenant_id, bucket, key, size, etag, content_type, version_id, metadata, last_modified, deleted)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&info.tenant_id)
        .bind(&info.bucket)
        .bind(&info.key)
        .bind(info.size)
        .bind(&info.etag)
        .bind(&info.content_type)
        .bind(&info.version_id)
        .bind(metadata)
        .bind(to_ts(info.last_modified))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn delete_object(&self, tenant_id: &str, bucket: &str, key: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE objects SET deleted = 1 WHERE tenant_id = ? AND bucket = ? AND key = ? AND deleted = 0"#,
        )
        .bind(tenant_id)
        .bind(bucket)
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AclManager for LocalCatalog {
    async fn get_bucket_acl(&self, tenant_id: &str, bucket: &str) -> Result<Option<BucketAcl>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as(r#"SELECT acl FROM buckets WHERE tenant_id = ? AND name = ?"#)
                .bind(tenant_id)
                .bind(bucket)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(row
            .and_then(|r| r.0)
            .and_then(|blob| serde_json::from_str(&blob).ok()))
    }

    async fn apply_bucket_acl(&self, tenant_id: &str, bucket: &str, acl: &BucketAcl) -> Result<()> {
        let blob = serde_json::to_string(acl).map_err(|e| Error::DatabaseError(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO buckets (tenant_id, name, metadata, acl, created_at)
            VALUES (?, ?, '{}', ?, ?)
            ON CONFLICT(tenant_id, name) DO UPDATE SET acl = excluded.acl
            "#,
        )
        .bind(tenant_id)
        .bind(bucket)
        .bind(blob)
        .bind(to_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn catalog() -> LocalCatalog {
        LocalCatalog::new("sqlite::memory:").await.unwrap()
    }

    fn tenant(id: &str) -> Tenant {
        Tenant {
            id: id.into(),
            name: format!("tenant-{}", id),
            display_name: None,
            max_storage_bytes: 0,
            current_storage_bytes: 0,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn object(bucket: &str, key: &str, size: i64) -> ObjectInfo {
        ObjectInfo {
            tenant_id: "t1".into(),
            bucket: bucket.into(),
            key: key.into(),
            size,
            etag: format!("etag-{}", key),
            content_type: "text/plain".into(),
            version_id: None,
            metadata: Default::default(),
            last_modified: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_apply_is_upsert() {
        let catalog = catalog().await;

        let mut t = tenant("t1");
        catalog.apply_tenant(&t).await.unwrap();
        t.name = "renamed".into();
        catalog.apply_tenant(&t).await.unwrap();

        let tenants = catalog.list_tenants().await.unwrap();
        assert_eq!(tenants.len(), 1);
        assert_eq!(tenants[0].name, "renamed");
    }

    #[tokio::test]
    async fn test_delete_entity_by_kind() {
        let catalog = catalog().await;
        catalog.apply_tenant(&tenant("t1")).await.unwrap();

        assert!(catalog.delete_entity(EntityKind::Tenant, "t1").await.unwrap());
        assert!(!catalog.delete_entity(EntityKind::Tenant, "t1").await.unwrap());
        assert!(catalog.list_tenants().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_object_counts_ignore_deleted() {
        let catalog = catalog().await;
        catalog.record_object(&object("photos", "a", 100)).await.unwrap();
        catalog.record_object(&object("photos", "b", 200)).await.unwrap();

        assert_eq!(catalog.count_objects("t1", "photos").await.unwrap(), (2, 300));
        assert_eq!(catalog.tenant_storage_bytes("t1").await.unwrap(), 300);

        assert!(catalog.delete_object("t1", "photos", "a").await.unwrap());
        assert_eq!(catalog.count_objects("t1", "photos").await.unwrap(), (1, 200));

        let live = catalog.list_live_objects("t1", "photos", None).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].key, "b");
    }

    #[tokio::test]
    async fn test_prefix_listing() {
        let catalog = catalog().await;
        catalog.record_object(&object("photos", "logs/a", 1)).await.unwrap();
        catalog.record_object(&object("photos", "data/b", 1)).await.unwrap();

        let logs = catalog
            .list_live_objects("t1", "photos", Some("logs/"))
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].key, "logs/a");
    }

    #[tokio::test]
    async fn test_bucket_metadata_roundtrip() {
        let catalog = catalog().await;

        let mut info = BucketInfo {
            name: "photos".into(),
            tenant_id: "t1".into(),
            owner_id: Some("u1".into()),
            object_count: 0,
            size_bytes: 0,
            metadata: Default::default(),
            created_at: Utc::now(),
        };
        info.metadata
            .insert("cluster:location".into(), "n2".into());
        catalog.update_bucket("t1", "photos", &info).await.unwrap();

        let loaded = catalog.get_bucket_info("t1", "photos").await.unwrap().unwrap();
        assert_eq!(loaded.location(), Some("n2"));
        assert_eq!(loaded.owner_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_acl_and_config_blobs() {
        let catalog = catalog().await;

        assert!(catalog.get_bucket_acl("t1", "photos").await.unwrap().is_none());

        let acl = BucketAcl {
            canned_acl: "public-read".into(),
            grants: vec![],
        };
        catalog.apply_bucket_acl("t1", "photos", &acl).await.unwrap();
        let loaded = catalog.get_bucket_acl("t1", "photos").await.unwrap().unwrap();
        assert_eq!(loaded.canned_acl, "public-read");

        let config = BucketConfig {
            versioning: Some(serde_json::json!({"status": "Enabled"})),
            ..Default::default()
        };
        catalog.apply_bucket_config("t1", "photos", &config).await.unwrap();
        let loaded = catalog.get_bucket_config("t1", "photos").await.unwrap();
        assert!(loaded.versioning.is_some());
        assert!(loaded.lifecycle.is_none());
    }
}
