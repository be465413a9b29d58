//! Cluster metadata store
//!
//! Owns every `cluster_*` table: local identity, peers, health history,
//! tombstones, per-entity sync status, replication rules/queue/status,
//! migrations and runtime global config. SQLite backend via sqlx.

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

use sahab_core::types::{
    EntityKind, HealthSample, HealthStatus, LocalConfig, MigrationJob, MigrationState, Node,
    QueueItemStatus, QueueOperation, ReplicationObjectStatus, ReplicationQueueItem,
    ReplicationRule, SyncStatus, Tombstone,
};
use sahab_core::{Error, Result};

fn to_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(|v| parse_ts(v))
}

pub struct ClusterStore {
    pool: SqlitePool,
}

impl ClusterStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        // An in-memory SQLite database exists per connection, so the pool
        // must not fan out across connections there.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 32 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cluster_config (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                node_id TEXT NOT NULL,
                node_name TEXT NOT NULL,
                cluster_token TEXT NOT NULL,
                region TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cluster_nodes (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                token TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                region TEXT,
                health_status TEXT NOT NULL DEFAULT 'unknown',
                last_health_check TEXT,
                latency_ms INTEGER,
                bucket_count INTEGER NOT NULL DEFAULT 0,
                storage_used_bytes INTEGER NOT NULL DEFAULT 0,
                storage_total_bytes INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cluster_health_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id TEXT NOT NULL,
                status TEXT NOT NULL,
                latency_ms INTEGER NOT NULL DEFAULT 0,
                timestamp TEXT NOT NULL,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_health_history_node ON cluster_health_history(node_id, timestamp)"#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cluster_deletion_log (
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                deleted_by_node_id TEXT NOT NULL,
                deleted_at TEXT NOT NULL,
                PRIMARY KEY (entity_type, entity_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        // One sync-status table per entity kind, identical shape, unique on
        // (entity_id, destination_node_id).
        for kind in EntityKind::ALL {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    entity_id TEXT NOT NULL,
                    destination_node_id TEXT NOT NULL,
                    source_node_id TEXT NOT NULL,
                    checksum TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'pending',
                    last_sync_at TEXT,
                    last_error TEXT,
                    PRIMARY KEY (entity_id, destination_node_id)
                )
                "#,
                kind.sync_table()
            ))
            .execute(&self.pool)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cluster_bucket_replication (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                source_bucket TEXT NOT NULL,
                destination_node_id TEXT NOT NULL,
                destination_bucket TEXT NOT NULL,
                sync_interval_seconds INTEGER NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                replicate_deletes INTEGER NOT NULL DEFAULT 0,
                replicate_metadata INTEGER NOT NULL DEFAULT 1,
                prefix TEXT,
                priority INTEGER NOT NULL DEFAULT 0,
                last_sync_at TEXT,
                objects_synced INTEGER NOT NULL DEFAULT 0,
                bytes_synced INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cluster_replication_queue (
                id TEXT PRIMARY KEY,
                rule_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                source_bucket TEXT NOT NULL,
                object_key TEXT NOT NULL,
                destination_node_id TEXT NOT NULL,
                destination_bucket TEXT NOT NULL,
                operation TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                priority INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        // At most one non-terminal item per (rule, key); enqueue relies on
        // INSERT OR IGNORE hitting this index.
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_replication_queue_active
            ON cluster_replication_queue(rule_id, object_key)
            WHERE status IN ('pending', 'processing')
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_replication_queue_pending ON cluster_replication_queue(status, priority, created_at)"#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cluster_replication_status (
                rule_id TEXT NOT NULL,
                object_key TEXT NOT NULL,
                source_version_id TEXT,
                destination_version_id TEXT,
                source_etag TEXT,
                destination_etag TEXT,
                source_size INTEGER NOT NULL DEFAULT 0,
                destination_size INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                last_sync_at TEXT NOT NULL,
                PRIMARY KEY (rule_id, object_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cluster_migrations (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                bucket_name TEXT NOT NULL,
                source_node_id TEXT NOT NULL,
                target_node_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                objects_total INTEGER NOT NULL DEFAULT 0,
                objects_migrated INTEGER NOT NULL DEFAULT 0,
                bytes_total INTEGER NOT NULL DEFAULT 0,
                bytes_migrated INTEGER NOT NULL DEFAULT 0,
                delete_source INTEGER NOT NULL DEFAULT 0,
                verify_data INTEGER NOT NULL DEFAULT 1,
                error_message TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cluster_global_config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        info!("Cluster metadata store initialized");
        Ok(())
    }

    // ============= Local Config =============

    pub async fn get_local_config(&self) -> Result<Option<LocalConfig>> {
        let row: Option<(String, String, String, String, i64, String, String)> = sqlx::query_as(
            r#"
            SELECT node_id, node_name, cluster_token, region, enabled, created_at, updated_at
            FROM cluster_config WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(row.map(|r| LocalConfig {
            node_id: r.0,
            node_name: r.1,
            cluster_token: r.2,
            region: r.3,
            enabled: r.4 != 0,
            created_at: parse_ts(&r.5),
            updated_at: parse_ts(&r.6),
        }))
    }

    /// Create the singleton config row. Fails if the cluster is already
    /// initialized.
    pub async fn insert_local_config(&self, config: &LocalConfig) -> Result<()> {
        if self.get_local_config().await?.is_some() {
            return Err(Error::AlreadyInitialized);
        }

        sqlx::query(
            r#"
            INSERT INTO cluster_config (id, node_id, node_name, cluster_token, region, enabled, created_at, updated_at)
            VALUES (1, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&config.node_id)
        .bind(&config.node_name)
        .bind(&config.cluster_token)
        .bind(&config.region)
        .bind(config.enabled as i64)
        .bind(to_ts(config.created_at))
        .bind(to_ts(config.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(())
    }

    pub async fn set_cluster_enabled(&self, enabled: bool) -> Result<()> {
        sqlx::query(r#"UPDATE cluster_config SET enabled = ?, updated_at = ? WHERE id = 1"#)
            .bind(enabled as i64)
            .bind(to_ts(Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    // ============= Global Config =============

    /// Seed default keys without overwriting operator-set values.
    pub async fn seed_global_defaults(&self, defaults: &[(String, String)]) -> Result<()> {
        for (key, value) in defaults {
            sqlx::query(
                r#"INSERT OR IGNORE INTO cluster_global_config (key, value, updated_at) VALUES (?, ?, ?)"#,
            )
            .bind(key)
            .bind(value)
            .bind(to_ts(Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn get_global(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as(r#"SELECT value FROM cluster_global_config WHERE key = ?"#)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(row.map(|r| r.0))
    }

    pub async fn set_global(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cluster_global_config (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(to_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub async fn get_global_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(self
            .get_global(key)
            .await?
            .map(|v| v == "true" || v == "1")
            .unwrap_or(default))
    }

    pub async fn get_global_i64(&self, key: &str, default: i64) -> Result<i64> {
        Ok(self
            .get_global(key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(default))
    }

    // ============= Nodes =============

    pub async fn insert_node(&self, node: &Node) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cluster_nodes
                (id, name, endpoint, token, priority, region, health_status, last_health_check,
                 latency_ms, bucket_count, storage_used_bytes, storage_total_bytes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&node.id)
        .bind(&node.name)
        .bind(&node.endpoint)
        .bind(&node.token)
        .bind(node.priority)
        .bind(&node.region)
        .bind(node.health_status.as_str())
        .bind(node.last_health_check.map(to_ts))
        .bind(node.latency_ms)
        .bind(node.bucket_count)
        .bind(node.storage_used_bytes)
        .bind(node.storage_total_bytes)
        .bind(to_ts(node.created_at))
        .bind(to_ts(node.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE") {
                Error::Conflict(format!("Node already exists: {}", node.id))
            } else {
                Error::DatabaseError(e.to_string())
            }
        })?;
        Ok(())
    }

    pub async fn update_node(&self, node: &Node) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE cluster_nodes
            SET name = ?, endpoint = ?, token = ?, priority = ?, region = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&node.name)
        .bind(&node.endpoint)
        .bind(&node.token)
        .bind(node.priority)
        .bind(&node.region)
        .bind(to_ts(Utc::now()))
        .bind(&node.id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::NodeNotFound(node.id.clone()));
        }
        Ok(())
    }

    /// Remove a node and everything keyed to it.
    pub async fn remove_node(&self, node_id: &str) -> Result<()> {
        let result = sqlx::query(r#"DELETE FROM cluster_nodes WHERE id = ?"#)
            .bind(node_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::NodeNotFound(node_id.to_string()));
        }

        sqlx::query(r#"DELETE FROM cluster_health_history WHERE node_id = ?"#)
            .bind(node_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

        for kind in EntityKind::ALL {
            sqlx::query(&format!(
                r#"DELETE FROM {} WHERE destination_node_id = ?"#,
                kind.sync_table()
            ))
            .bind(node_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        }

        Ok(())
    }

    pub async fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        let row: Option<NodeRow> = sqlx::query_as(&format!(
            "{} WHERE id = ?",
            NODE_SELECT
        ))
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(row.map(node_from_row))
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        let rows: Vec<NodeRow> = sqlx::query_as(&format!("{} ORDER BY name", NODE_SELECT))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(node_from_row).collect())
    }

    /// Peers whose last observed health is `healthy`, excluding the given
    /// node id (normally the local node).
    pub async fn list_healthy_nodes(&self, exclude_node_id: &str) -> Result<Vec<Node>> {
        let rows: Vec<NodeRow> = sqlx::query_as(&format!(
            "{} WHERE health_status = 'healthy' AND id != ? ORDER BY priority DESC, name",
            NODE_SELECT
        ))
        .bind(exclude_node_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(node_from_row).collect())
    }

    pub async fn update_node_health(
        &self,
        node_id: &str,
        status: HealthStatus,
        latency_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cluster_nodes
            SET health_status = ?, latency_ms = ?, last_health_check = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(latency_ms)
        .bind(to_ts(Utc::now()))
        .bind(to_ts(Utc::now()))
        .bind(node_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    // ============= Health History =============

    pub async fn insert_health_sample(
        &self,
        node_id: &str,
        status: HealthStatus,
        latency_ms: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cluster_health_history (node_id, status, latency_ms, timestamp, error_message)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(node_id)
        .bind(status.as_str())
        .bind(latency_ms)
        .bind(to_ts(Utc::now()))
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub async fn list_health_samples(&self, node_id: &str, limit: i64) -> Result<Vec<HealthSample>> {
        let rows: Vec<(i64, String, String, i64, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT id, node_id, status, latency_ms, timestamp, error_message
            FROM cluster_health_history
            WHERE node_id = ?
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(node_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|r| HealthSample {
                id: r.0,
                node_id: r.1,
                status: HealthStatus::parse(&r.2),
                latency_ms: r.3,
                timestamp: parse_ts(&r.4),
                error_message: r.5,
            })
            .collect())
    }

    pub async fn prune_health_history(&self, max_age: Duration) -> Result<u64> {
        let cutoff = Utc::now() - max_age;
        let result = sqlx::query(r#"DELETE FROM cluster_health_history WHERE timestamp < ?"#)
            .bind(to_ts(cutoff))
            .execute(&self.pool)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(result.rows_affected())
    }

    // ============= Tombstones =============

    /// Record a deletion. Re-recording the same (type, id) refreshes the
    /// author and timestamp instead of inserting a second row.
    pub async fn record_tombstone(&self, tombstone: &Tombstone) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cluster_deletion_log (entity_type, entity_id, deleted_by_node_id, deleted_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(entity_type, entity_id) DO UPDATE SET
                deleted_by_node_id = excluded.deleted_by_node_id,
                deleted_at = excluded.deleted_at
            "#,
        )
        .bind(tombstone.entity_type.as_str())
        .bind(&tombstone.entity_id)
        .bind(&tombstone.deleted_by_node_id)
        .bind(to_ts(tombstone.deleted_at))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// All tombstones in a stable order, so a content checksum over the set
    /// is deterministic.
    pub async fn list_tombstones(&self) -> Result<Vec<Tombstone>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT entity_type, entity_id, deleted_by_node_id, deleted_at
            FROM cluster_deletion_log
            ORDER BY entity_type, entity_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                EntityKind::parse(&r.0).map(|kind| Tombstone {
                    entity_type: kind,
                    entity_id: r.1,
                    deleted_by_node_id: r.2,
                    deleted_at: parse_ts(&r.3),
                })
            })
            .collect())
    }

    pub async fn cleanup_tombstones(&self, max_age: Duration) -> Result<u64> {
        let cutoff = Utc::now() - max_age;
        let result = sqlx::query(r#"DELETE FROM cluster_deletion_log WHERE deleted_at < ?"#)
            .bind(to_ts(cutoff))
            .execute(&self.pool)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(result.rows_affected())
    }

    // ============= Sync Status =============

    pub async fn sync_checksum(
        &self,
        kind: EntityKind,
        entity_id: &str,
        destination_node_id: &str,
    ) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(&format!(
            r#"SELECT checksum FROM {} WHERE entity_id = ? AND destination_node_id = ?"#,
            kind.sync_table()
        ))
        .bind(entity_id)
        .bind(destination_node_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(row.map(|r| r.0).filter(|c| !c.is_empty()))
    }

    pub async fn record_sync_success(
        &self,
        kind: EntityKind,
        entity_id: &str,
        destination_node_id: &str,
        source_node_id: &str,
        checksum: &str,
    ) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (entity_id, destination_node_id, source_node_id, checksum, status, last_sync_at, last_error)
            VALUES (?, ?, ?, ?, 'synced', ?, NULL)
            ON CONFLICT(entity_id, destination_node_id) DO UPDATE SET
                source_node_id = excluded.source_node_id,
                checksum = excluded.checksum,
                status = 'synced',
                last_sync_at = excluded.last_sync_at,
                last_error = NULL
            "#,
            kind.sync_table()
        ))
        .bind(entity_id)
        .bind(destination_node_id)
        .bind(source_node_id)
        .bind(checksum)
        .bind(to_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Record a failed push. The stored checksum is left untouched so the
    /// next cycle retries the record.
    pub async fn record_sync_failure(
        &self,
        kind: EntityKind,
        entity_id: &str,
        destination_node_id: &str,
        source_node_id: &str,
        error: &str,
    ) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (entity_id, destination_node_id, source_node_id, checksum, status, last_sync_at, last_error)
            VALUES (?, ?, ?, '', 'error', NULL, ?)
            ON CONFLICT(entity_id, destination_node_id) DO UPDATE SET
                status = 'error',
                last_error = excluded.last_error
            "#,
            kind.sync_table()
        ))
        .bind(entity_id)
        .bind(destination_node_id)
        .bind(source_node_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub async fn list_sync_status(&self, kind: EntityKind, limit: i64) -> Result<Vec<SyncStatus>> {
        let rows: Vec<(
            String,
            String,
            String,
            String,
            String,
            Option<String>,
            Option<String>,
        )> = sqlx::query_as(&format!(
            r#"
            SELECT entity_id, destination_node_id, source_node_id, checksum, status, last_sync_at, last_error
            FROM {}
            ORDER BY entity_id, destination_node_id
            LIMIT ?
            "#,
            kind.sync_table()
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|r| SyncStatus {
                entity_id: r.0,
                destination_node_id: r.1,
                source_node_id: r.2,
                checksum: r.3,
                status: r.4,
                last_sync_at: parse_opt_ts(r.5),
                last_error: r.6,
            })
            .collect())
    }

    pub async fn clear_sync_rows(&self, kind: EntityKind, entity_id: &str) -> Result<()> {
        sqlx::query(&format!(
            r#"DELETE FROM {} WHERE entity_id = ?"#,
            kind.sync_table()
        ))
        .bind(entity_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    // ============= Replication Rules =============

    pub async fn create_rule(&self, rule: &ReplicationRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cluster_bucket_replication
                (id, tenant_id, source_bucket, destination_node_id, destination_bucket,
                 sync_interval_seconds, enabled, replicate_deletes, replicate_metadata, prefix,
                 priority, last_sync_at, objects_synced, bytes_synced, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.tenant_id)
        .bind(&rule.source_bucket)
        .bind(&rule.destination_node_id)
        .bind(&rule.destination_bucket)
        .bind(rule.sync_interval_seconds)
        .bind(rule.enabled as i64)
        .bind(rule.replicate_deletes as i64)
        .bind(rule.replicate_metadata as i64)
        .bind(&rule.prefix)
        .bind(rule.priority)
        .bind(rule.last_sync_at.map(to_ts))
        .bind(rule.objects_synced)
        .bind(rule.bytes_synced)
        .bind(to_ts(rule.created_at))
        .bind(to_ts(rule.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE") {
                Error::Conflict(format!("Replication rule already exists: {}", rule.id))
            } else {
                Error::DatabaseError(e.to_string())
            }
        })?;
        Ok(())
    }

    pub async fn get_rule(&self, rule_id: &str) -> Result<Option<ReplicationRule>> {
        let row: Option<RuleRow> = sqlx::query_as(&format!("{} WHERE id = ?", RULE_SELECT))
            .bind(rule_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(row.map(rule_from_row))
    }

    pub async fn list_rules(&self) -> Result<Vec<ReplicationRule>> {
        let rows: Vec<RuleRow> =
            sqlx::query_as(&format!("{} ORDER BY created_at", RULE_SELECT))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(rows.into_iter().map(rule_from_row).collect())
    }

    /// Enabled rules in scheduling order.
    pub async fn list_enabled_rules(&self) -> Result<Vec<ReplicationRule>> {
        let rows: Vec<RuleRow> = sqlx::query_as(&format!(
            "{} WHERE enabled = 1 ORDER BY priority DESC, created_at ASC",
            RULE_SELECT
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(rows.into_iter().map(rule_from_row).collect())
    }

    pub async fn update_rule(&self, rule: &ReplicationRule) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE cluster_bucket_replication
            SET destination_node_id = ?, destination_bucket = ?, sync_interval_seconds = ?,
                enabled = ?, replicate_deletes = ?, replicate_metadata = ?, prefix = ?,
                priority = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&rule.destination_node_id)
        .bind(&rule.destination_bucket)
        .bind(rule.sync_interval_seconds)
        .bind(rule.enabled as i64)
        .bind(rule.replicate_deletes as i64)
        .bind(rule.replicate_metadata as i64)
        .bind(&rule.prefix)
        .bind(rule.priority)
        .bind(to_ts(Utc::now()))
        .bind(&rule.id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::RuleNotFound(rule.id.clone()));
        }
        Ok(())
    }

    pub async fn delete_rule(&self, rule_id: &str) -> Result<()> {
        let result = sqlx::query(r#"DELETE FROM cluster_bucket_replication WHERE id = ?"#)
            .bind(rule_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::RuleNotFound(rule_id.to_string()));
        }
        Ok(())
    }

    pub async fn touch_rule_last_sync(&self, rule_id: &str) -> Result<()> {
        sqlx::query(
            r#"UPDATE cluster_bucket_replication SET last_sync_at = ?, updated_at = ? WHERE id = ?"#,
        )
        .bind(to_ts(Utc::now()))
        .bind(to_ts(Utc::now()))
        .bind(rule_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub async fn add_rule_counters(&self, rule_id: &str, objects: i64, bytes: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cluster_bucket_replication
            SET objects_synced = objects_synced + ?, bytes_synced = bytes_synced + ?
            WHERE id = ?
            "#,
        )
        .bind(objects)
        .bind(bytes)
        .bind(rule_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    // ============= Replication Queue =============

    /// Enqueue one item. Returns false when a pending/processing item for
    /// the same (rule, key) already exists.
    pub async fn enqueue_item(&self, item: &ReplicationQueueItem) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO cluster_replication_queue
                (id, rule_id, tenant_id, source_bucket, object_key, destination_node_id,
                 destination_bucket, operation, status, attempts, max_attempts, priority,
                 last_error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.rule_id)
        .bind(&item.tenant_id)
        .bind(&item.source_bucket)
        .bind(&item.object_key)
        .bind(&item.destination_node_id)
        .bind(&item.destination_bucket)
        .bind(item.operation.as_str())
        .bind(item.status.as_str())
        .bind(item.attempts)
        .bind(item.max_attempts)
        .bind(item.priority)
        .bind(&item.last_error)
        .bind(to_ts(item.created_at))
        .bind(to_ts(item.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    /// Next batch of work in priority order.
    pub async fn fetch_pending_items(&self, limit: i64) -> Result<Vec<ReplicationQueueItem>> {
        let rows: Vec<QueueRow> = sqlx::query_as(&format!(
            r#"
            {} WHERE status = 'pending' AND attempts < max_attempts
            ORDER BY priority DESC, created_at ASC
            LIMIT ?
            "#,
            QUEUE_SELECT
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(queue_item_from_row).collect())
    }

    /// Claim an item for a worker. Returns false if another worker got it
    /// first.
    pub async fn mark_item_processing(&self, item_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE cluster_replication_queue
            SET status = 'processing', updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(to_ts(Utc::now()))
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn complete_item(&self, item_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cluster_replication_queue
            SET status = 'completed', last_error = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(to_ts(Utc::now()))
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Record a failed attempt. The item returns to `pending` while it has
    /// attempts left; once attempts reach the budget it is terminal
    /// `failed`. Returns the resulting status.
    pub async fn fail_item(&self, item_id: &str, error: &str) -> Result<QueueItemStatus> {
        sqlx::query(
            r#"
            UPDATE cluster_replication_queue
            SET attempts = attempts + 1,
                status = CASE WHEN attempts + 1 >= max_attempts THEN 'failed' ELSE 'pending' END,
                last_error = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(to_ts(Utc::now()))
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        let row: Option<(String,)> =
            sqlx::query_as(r#"SELECT status FROM cluster_replication_queue WHERE id = ?"#)
                .bind(item_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(row
            .and_then(|r| QueueItemStatus::parse(&r.0))
            .unwrap_or(QueueItemStatus::Failed))
    }

    /// `(pending, processing, completed, failed)` counts.
    pub async fn queue_counts(&self) -> Result<(i64, i64, i64, i64)> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"SELECT status, COUNT(*) FROM cluster_replication_queue GROUP BY status"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        let mut counts = (0, 0, 0, 0);
        for (status, count) in rows {
            match status.as_str() {
                "pending" => counts.0 = count,
                "processing" => counts.1 = count,
                "completed" => counts.2 = count,
                "failed" => counts.3 = count,
                _ => {}
            }
        }
        Ok(counts)
    }

    // ============= Replication Status =============

    pub async fn upsert_replication_status(&self, status: &ReplicationObjectStatus) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cluster_replication_status
                (rule_id, object_key, source_version_id, destination_version_id,
                 source_etag, destination_etag, source_size, destination_size, status, last_sync_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(rule_id, object_key) DO UPDATE SET
                source_version_id = excluded.source_version_id,
                destination_version_id = excluded.destination_version_id,
                source_etag = excluded.source_etag,
                destination_etag = excluded.destination_etag,
                source_size = excluded.source_size,
                destination_size = excluded.destination_size,
                status = excluded.status,
                last_sync_at = excluded.last_sync_at
            "#,
        )
        .bind(&status.rule_id)
        .bind(&status.object_key)
        .bind(&status.source_version_id)
        .bind(&status.destination_version_id)
        .bind(&status.source_etag)
        .bind(&status.destination_etag)
        .bind(status.source_size)
        .bind(status.destination_size)
        .bind(&status.status)
        .bind(to_ts(status.last_sync_at))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub async fn get_replication_status(
        &self,
        rule_id: &str,
        object_key: &str,
    ) -> Result<Option<ReplicationObjectStatus>> {
        let row: Option<(
            String,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            i64,
            i64,
            String,
            String,
        )> = sqlx::query_as(
            r#"
            SELECT rule_id, object_key, source_version_id, destination_version_id,
                   source_etag, destination_etag, source_size, destination_size, status, last_sync_at
            FROM cluster_replication_status
            WHERE rule_id = ? AND object_key = ?
            "#,
        )
        .bind(rule_id)
        .bind(object_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(row.map(|r| ReplicationObjectStatus {
            rule_id: r.0,
            object_key: r.1,
            source_version_id: r.2,
            destination_version_id: r.3,
            source_etag: r.4,
            destination_etag: r.5,
            source_size: r.6,
            destination_size: r.7,
            status: r.8,
            last_sync_at: parse_ts(&r.9),
        }))
    }

    // ============= Migrations =============

    pub async fn create_migration(&self, job: &MigrationJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cluster_migrations
                (id, tenant_id, bucket_name, source_node_id, target_node_id, status,
                 objects_total, objects_migrated, bytes_total, bytes_migrated,
                 delete_source, verify_data, error_message, created_at, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.tenant_id)
        .bind(&job.bucket_name)
        .bind(&job.source_node_id)
        .bind(&job.target_node_id)
        .bind(job.status.as_str())
        .bind(job.objects_total)
        .bind(job.objects_migrated)
        .bind(job.bytes_total)
        .bind(job.bytes_migrated)
        .bind(job.delete_source as i64)
        .bind(job.verify_data as i64)
        .bind(&job.error_message)
        .bind(to_ts(job.created_at))
        .bind(job.started_at.map(to_ts))
        .bind(job.completed_at.map(to_ts))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub async fn set_migration_running(&self, job_id: &str) -> Result<()> {
        sqlx::query(
            r#"UPDATE cluster_migrations SET status = 'in_progress', started_at = ? WHERE id = ?"#,
        )
        .bind(to_ts(Utc::now()))
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub async fn set_migration_totals(&self, job_id: &str, objects: i64, bytes: i64) -> Result<()> {
        sqlx::query(
            r#"UPDATE cluster_migrations SET objects_total = ?, bytes_total = ? WHERE id = ?"#,
        )
        .bind(objects)
        .bind(bytes)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub async fn set_migration_progress(
        &self,
        job_id: &str,
        objects_migrated: i64,
        bytes_migrated: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE cluster_migrations SET objects_migrated = ?, bytes_migrated = ? WHERE id = ?"#,
        )
        .bind(objects_migrated)
        .bind(bytes_migrated)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub async fn finish_migration(
        &self,
        job_id: &str,
        state: MigrationState,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cluster_migrations
            SET status = ?, error_message = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(state.as_str())
        .bind(error_message)
        .bind(to_ts(Utc::now()))
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub async fn get_migration(&self, job_id: &str) -> Result<Option<MigrationJob>> {
        let row: Option<MigrationRow> =
            sqlx::query_as(&format!("{} WHERE id = ?", MIGRATION_SELECT))
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(row.map(migration_from_row))
    }

    pub async fn list_migrations(&self, limit: i64) -> Result<Vec<MigrationJob>> {
        let rows: Vec<MigrationRow> = sqlx::query_as(&format!(
            "{} ORDER BY created_at DESC LIMIT ?",
            MIGRATION_SELECT
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(rows.into_iter().map(migration_from_row).collect())
    }
}

// ============= Row Mapping =============

const NODE_SELECT: &str = r#"
    SELECT id, name, endpoint, token, priority, region, health_status, last_health_check,
           latency_ms, bucket_count, storage_used_bytes, storage_total_bytes, created_at, updated_at
    FROM cluster_nodes
"#;

type NodeRow = (
    String,         // id
    String,         // name
    String,         // endpoint
    String,         // token
    i32,            // priority
    Option<String>, // region
    String,         // health_status
    Option<String>, // last_health_check
    Option<i64>,    // latency_ms
    i64,            // bucket_count
    i64,            // storage_used_bytes
    i64,            // storage_total_bytes
    String,         // created_at
    String,         // updated_at
);

fn node_from_row(r: NodeRow) -> Node {
    Node {
        id: r.0,
        name: r.1,
        endpoint: r.2,
        token: r.3,
        priority: r.4,
        region: r.5,
        health_status: HealthStatus::parse(&r.6),
        last_health_check: parse_opt_ts(r.7),
        latency_ms: r.8,
        bucket_count: r.9,
        storage_used_bytes: r.10,
        storage_total_bytes: r.11,
        created_at: parse_ts(&r.12),
        updated_at: parse_ts(&r.13),
    }
}

const RULE_SELECT: &str = r#"
    SELECT id, tenant_id, source_bucket, destination_node_id, destination_bucket,
           sync_interval_seconds, enabled, replicate_deletes, replicate_metadata, prefix,
           priority, last_sync_at, objects_synced, bytes_synced, created_at, updated_at
    FROM cluster_bucket_replication
"#;

type RuleRow = (
    String,         // id
    String,         // tenant_id
    String,         // source_bucket
    String,         // destination_node_id
    String,         // destination_bucket
    i64,            // sync_interval_seconds
    i64,            // enabled
    i64,            // replicate_deletes
    i64,            // replicate_metadata
    Option<String>, // prefix
    i32,            // priority
    Option<String>, // last_sync_at
    i64,            // objects_synced
    i64,            // bytes_synced
    String,         // created_at
    String,         // updated_at
);

fn rule_from_row(r: RuleRow) -> ReplicationRule {
    ReplicationRule {
        id: r.0,
        tenant_id: r.1,
        source_bucket: r.2,
        destination_node_id: r.3,
        destination_bucket: r.4,
        sync_interval_seconds: r.5,
        enabled: r.6 != 0,
        replicate_deletes: r.7 != 0,
        replicate_metadata: r.8 != 0,
        prefix: r.9,
        priority: r.10,
        last_sync_at: parse_opt_ts(r.11),
        objects_synced: r.12,
        bytes_synced: r.13,
        created_at: parse_ts(&r.14),
        updated_at: parse_ts(&r.15),
    }
}

const QUEUE_SELECT: &str = r#"
    SELECT id, rule_id, tenant_id, source_bucket, object_key, destination_node_id,
           destination_bucket, operation, status, attempts, max_attempts, priority,
           last_error, created_at, updated_at
    FROM cluster_replication_queue
"#;

type QueueRow = (
    String,         // id
    String,         // rule_id
    String,         // tenant_id
    String,         // source_bucket
    String,         // object_key
    String,         // destination_node_id
    String,         // destination_bucket
    String,         // operation
    String,         // status
    i32,            // attempts
    i32,            // max_attempts
    i32,            // priority
    Option<String>, // last_error
    String,         // created_at
    String,         // updated_at
);

fn queue_item_from_row(r: QueueRow) -> ReplicationQueueItem {
    ReplicationQueueItem {
        id: r.0,
        rule_id: r.1,
        tenant_id: r.2,
        source_bucket: r.3,
        object_key: r.4,
        destination_node_id: r.5,
        destination_bucket: r.6,
        operation: QueueOperation::parse(&r.7).unwrap_or(QueueOperation::Put),
        status: QueueItemStatus::parse(&r.8).unwrap_or(QueueItemStatus::Pending),
        attempts: r.9,
        max_attempts: r.10,
        priority: r.11,
        last_error: r.12,
        created_at: parse_ts(&r.13),
        updated_at: parse_ts(&r.14),
    }
}

const MIGRATION_SELECT: &str = r#"
    SELECT id, tenant_id, bucket_name, source_node_id, target_node_id, status,
           objects_total, objects_migrated, bytes_total, bytes_migrated,
           delete_source, verify_data, error_message, created_at, started_at, completed_at
    FROM cluster_migrations
"#;

type MigrationRow = (
    String,         // id
    String,         // tenant_id
    String,         // bucket_name
    String,         // source_node_id
    String,         // target_node_id
    String,         // status
    i64,            // objects_total
    i64,            // objects_migrated
    i64,            // bytes_total
    i64,            // bytes_migrated
    i64,            // delete_source
    i64,            // verify_data
    Option<String>, // error_message
    String,         // created_at
    Option<String>, // started_at
    Option<String>, // completed_at
);

fn migration_from_row(r: MigrationRow) -> MigrationJob {
    MigrationJob {
        id: r.0,
        tenant_id: r.1,
        bucket_name: r.2,
        source_node_id: r.3,
        target_node_id: r.4,
        status: MigrationState::parse(&r.5).unwrap_or(MigrationState::Pending),
        objects_total: r.6,
        objects_migrated: r.7,
        bytes_total: r.8,
        bytes_migrated: r.9,
        delete_source: r.10 != 0,
        verify_data: r.11 != 0,
        error_message: r.12,
        created_at: parse_ts(&r.13),
        started_at: parse_opt_ts(r.14),
        completed_at: parse_opt_ts(r.15),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sahab_core::types::MigrationRequest;

    async fn test_store() -> ClusterStore {
        ClusterStore::new("sqlite::memory:").await.unwrap()
    }

    fn test_node(name: &str) -> Node {
        Node::new(name, format!("http://{}:9400", name), "token".to_string())
    }

    #[tokio::test]
    async fn test_local_config_singleton() {
        let store = test_store().await;
        assert!(store.get_local_config().await.unwrap().is_none());

        let config = LocalConfig {
            node_id: "n1".into(),
            node_name: "node-1".into(),
            cluster_token: "tok".into(),
            region: "eu".into(),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.insert_local_config(&config).await.unwrap();

        let loaded = store.get_local_config().await.unwrap().unwrap();
        assert_eq!(loaded.node_id, "n1");
        assert_eq!(loaded.cluster_token, "tok");

        // Second initialize fails
        let err = store.insert_local_config(&config).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyInitialized));
    }

    #[tokio::test]
    async fn test_node_crud_and_healthy_filter() {
        let store = test_store().await;

        let mut a = test_node("node-a");
        let b = test_node("node-b");
        store.insert_node(&a).await.unwrap();
        store.insert_node(&b).await.unwrap();

        store
            .update_node_health(&a.id, HealthStatus::Healthy, 12)
            .await
            .unwrap();
        store
            .update_node_health(&b.id, HealthStatus::Unavailable, 0)
            .await
            .unwrap();

        let healthy = store.list_healthy_nodes("none").await.unwrap();
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].id, a.id);
        assert_eq!(healthy[0].latency_ms, Some(12));

        // Excluding the healthy node itself leaves nothing
        let healthy = store.list_healthy_nodes(&a.id).await.unwrap();
        assert!(healthy.is_empty());

        a.name = "renamed".into();
        store.update_node(&a).await.unwrap();
        assert_eq!(store.get_node(&a.id).await.unwrap().unwrap().name, "renamed");

        store.remove_node(&b.id).await.unwrap();
        assert!(store.get_node(&b.id).await.unwrap().is_none());
        assert!(matches!(
            store.remove_node(&b.id).await.unwrap_err(),
            Error::NodeNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_tombstone_idempotence() {
        let store = test_store().await;

        store
            .record_tombstone(&Tombstone::new(EntityKind::User, "u1", "nodeA"))
            .await
            .unwrap();
        store
            .record_tombstone(&Tombstone::new(EntityKind::User, "u1", "nodeB"))
            .await
            .unwrap();

        let tombstones = store.list_tombstones().await.unwrap();
        assert_eq!(tombstones.len(), 1);
        assert_eq!(tombstones[0].deleted_by_node_id, "nodeB");
    }

    #[tokio::test]
    async fn test_tombstone_cleanup_respects_age() {
        let store = test_store().await;

        let mut old = Tombstone::new(EntityKind::Tenant, "t-old", "n1");
        old.deleted_at = Utc::now() - Duration::hours(48);
        store.record_tombstone(&old).await.unwrap();
        store
            .record_tombstone(&Tombstone::new(EntityKind::Tenant, "t-new", "n1"))
            .await
            .unwrap();

        let removed = store.cleanup_tombstones(Duration::hours(24)).await.unwrap();
        assert_eq!(removed, 1);

        let left = store.list_tombstones().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].entity_id, "t-new");
    }

    #[tokio::test]
    async fn test_sync_status_checksum_skip_flow() {
        let store = test_store().await;
        let kind = EntityKind::Tenant;

        assert!(store.sync_checksum(kind, "t1", "n2").await.unwrap().is_none());

        store
            .record_sync_success(kind, "t1", "n2", "n1", "abc123")
            .await
            .unwrap();
        assert_eq!(
            store.sync_checksum(kind, "t1", "n2").await.unwrap(),
            Some("abc123".to_string())
        );

        // A failure leaves the pushed checksum untouched
        store
            .record_sync_failure(kind, "t1", "n2", "n1", "connection refused")
            .await
            .unwrap();
        assert_eq!(
            store.sync_checksum(kind, "t1", "n2").await.unwrap(),
            Some("abc123".to_string())
        );

        // A failure with no prior success yields no skippable checksum
        store
            .record_sync_failure(kind, "t2", "n2", "n1", "connection refused")
            .await
            .unwrap();
        assert!(store.sync_checksum(kind, "t2", "n2").await.unwrap().is_none());

        store.clear_sync_rows(kind, "t1").await.unwrap();
        assert!(store.sync_checksum(kind, "t1", "n2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_queue_dedup() {
        let store = test_store().await;
        let rule = ReplicationRule::new("t1", "photos", "n2", "photos");
        store.create_rule(&rule).await.unwrap();

        let first = ReplicationQueueItem::from_rule(&rule, "k", QueueOperation::Put);
        let second = ReplicationQueueItem::from_rule(&rule, "k", QueueOperation::Put);

        assert!(store.enqueue_item(&first).await.unwrap());
        assert!(!store.enqueue_item(&second).await.unwrap());

        let pending = store.fetch_pending_items(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].object_key, "k");

        // Once the first item completes, the key may be enqueued again
        store.complete_item(&first.id).await.unwrap();
        assert!(store.enqueue_item(&second).await.unwrap());
    }

    #[tokio::test]
    async fn test_queue_retry_budget() {
        let store = test_store().await;
        let rule = ReplicationRule::new("t1", "photos", "n2", "photos");
        store.create_rule(&rule).await.unwrap();

        let item = ReplicationQueueItem::from_rule(&rule, "k", QueueOperation::Put);
        store.enqueue_item(&item).await.unwrap();
        assert!(store.mark_item_processing(&item.id).await.unwrap());
        // Already claimed
        assert!(!store.mark_item_processing(&item.id).await.unwrap());

        // max_attempts is 3: two failures return to pending, the third is terminal
        assert_eq!(
            store.fail_item(&item.id, "boom").await.unwrap(),
            QueueItemStatus::Pending
        );
        assert_eq!(
            store.fail_item(&item.id, "boom").await.unwrap(),
            QueueItemStatus::Pending
        );
        assert_eq!(
            store.fail_item(&item.id, "boom").await.unwrap(),
            QueueItemStatus::Failed
        );

        assert!(store.fetch_pending_items(10).await.unwrap().is_empty());
        let (_, _, _, failed) = store.queue_counts().await.unwrap();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn test_queue_ordering() {
        let store = test_store().await;

        let mut low = ReplicationRule::new("t1", "a", "n2", "a");
        low.priority = 1;
        let mut high = ReplicationRule::new("t1", "b", "n2", "b");
        high.priority = 9;
        store.create_rule(&low).await.unwrap();
        store.create_rule(&high).await.unwrap();

        store
            .enqueue_item(&ReplicationQueueItem::from_rule(&low, "k1", QueueOperation::Put))
            .await
            .unwrap();
        store
            .enqueue_item(&ReplicationQueueItem::from_rule(&high, "k2", QueueOperation::Put))
            .await
            .unwrap();

        let items = store.fetch_pending_items(10).await.unwrap();
        assert_eq!(items[0].object_key, "k2");
        assert_eq!(items[1].object_key, "k1");
    }

    #[tokio::test]
    async fn test_migration_lifecycle() {
        let store = test_store().await;

        let request = MigrationRequest {
            tenant_id: "t1".into(),
            bucket_name: "photos".into(),
            target_node_id: "n2".into(),
            delete_source: false,
            verify_data: true,
        };
        let job = MigrationJob::new(&request, "n1".into());
        store.create_migration(&job).await.unwrap();

        store.set_migration_running(&job.id).await.unwrap();
        store.set_migration_totals(&job.id, 10, 1_000_000).await.unwrap();
        store.set_migration_progress(&job.id, 10, 999_500).await.unwrap();
        store
            .finish_migration(&job.id, MigrationState::Completed, None)
            .await
            .unwrap();

        let loaded = store.get_migration(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, MigrationState::Completed);
        assert_eq!(loaded.objects_total, 10);
        assert_eq!(loaded.objects_migrated, 10);
        assert!(loaded.started_at.is_some());
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_global_config_defaults_do_not_overwrite() {
        let store = test_store().await;

        store.set_global("replication_worker_count", "8").await.unwrap();
        store
            .seed_global_defaults(&sahab_core::config::global_config::defaults())
            .await
            .unwrap();

        assert_eq!(
            store.get_global_i64("replication_worker_count", 5).await.unwrap(),
            8
        );
        assert!(store
            .get_global_bool("auto_tenant_sync_enabled", false)
            .await
            .unwrap());
        assert_eq!(
            store.get_global_i64("queue_check_interval_seconds", 0).await.unwrap(),
            10
        );
    }

    #[tokio::test]
    async fn test_rule_crud() {
        let store = test_store().await;

        let mut rule = ReplicationRule::new("t1", "photos", "n2", "photos-copy");
        rule.sync_interval_seconds = 120;
        store.create_rule(&rule).await.unwrap();

        assert!(matches!(
            store.create_rule(&rule).await.unwrap_err(),
            Error::Conflict(_)
        ));

        rule.enabled = false;
        store.update_rule(&rule).await.unwrap();
        assert!(store.list_enabled_rules().await.unwrap().is_empty());

        store.touch_rule_last_sync(&rule.id).await.unwrap();
        store.add_rule_counters(&rule.id, 3, 4096).await.unwrap();
        let loaded = store.get_rule(&rule.id).await.unwrap().unwrap();
        assert!(loaded.last_sync_at.is_some());
        assert_eq!(loaded.objects_synced, 3);
        assert_eq!(loaded.bytes_synced, 4096);

        store.delete_rule(&rule.id).await.unwrap();
        assert!(store.get_rule(&rule.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replication_status_upsert() {
        let store = test_store().await;

        let mut status = ReplicationObjectStatus {
            rule_id: "r1".into(),
            object_key: "k".into(),
            source_version_id: None,
            destination_version_id: None,
            source_etag: Some("e1".into()),
            destination_etag: Some("e1".into()),
            source_size: 100,
            destination_size: 100,
            status: "completed".into(),
            last_sync_at: Utc::now(),
        };
        store.upsert_replication_status(&status).await.unwrap();

        status.source_etag = Some("e2".into());
        store.upsert_replication_status(&status).await.unwrap();

        let loaded = store.get_replication_status("r1", "k").await.unwrap().unwrap();
        assert_eq!(loaded.source_etag.as_deref(), Some("e2"));
    }
}
