//! Configuration for Sahab
//!
//! Static process configuration is loaded from a TOML file with environment
//! overrides. Runtime-tunable knobs live in the `cluster_global_config` table
//! and are re-read by the engines on every tick (see [`global_config`]).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SahabConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cluster: ClusterSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SahabConfig {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::InternalError(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::InternalError(format!("Failed to parse config: {}", e)))
    }

    /// Apply `SAHAB_*` environment variable overrides on top of `self`.
    pub fn apply_env(mut self) -> Self {
        if let Ok(addr) = std::env::var("SAHAB_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }
        if let Ok(port) = std::env::var("SAHAB_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Ok(url) = std::env::var("SAHAB_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(dir) = std::env::var("SAHAB_DATA_DIR") {
            self.storage.data_dir = dir.into();
        }
        if let Ok(name) = std::env::var("SAHAB_NODE_NAME") {
            self.cluster.node_name = name;
        }
        if let Ok(region) = std::env::var("SAHAB_REGION") {
            self.cluster.region = region;
        }
        if let Ok(endpoint) = std::env::var("SAHAB_ENDPOINT") {
            self.cluster.endpoint = endpoint;
        }
        if let Ok(level) = std::env::var("SAHAB_LOG_LEVEL") {
            self.logging.level = level;
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 9400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://sahab.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: std::path::PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: std::path::PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSection {
    /// Human-readable name for this node
    pub node_name: String,
    /// Region label recorded in the cluster config singleton
    pub region: String,
    /// Endpoint other peers use to reach this node
    pub endpoint: String,
    /// Health probe interval in seconds
    pub health_check_interval_secs: u64,
    /// Tombstone retention before the cleaner removes entries
    pub tombstone_retention_hours: u64,
    /// Tombstone fan-out interval in seconds
    pub deletion_sync_interval_secs: u64,
    /// Rate limit for inbound internal endpoints (requests/second)
    pub rate_limit_rps: f64,
    /// Rate limit burst size
    pub rate_limit_burst: u32,
    /// Bucket location cache TTL in seconds
    pub location_cache_ttl_secs: u64,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            node_name: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "sahab-node".to_string()),
            region: "default".to_string(),
            endpoint: "http://localhost:9400".to_string(),
            health_check_interval_secs: 10,
            tombstone_retention_hours: 168,
            deletion_sync_interval_secs: 60,
            rate_limit_rps: 50.0,
            rate_limit_burst: 100,
            location_cache_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Keys and defaults for the `cluster_global_config` table.
///
/// Engines read these on every tick so operators can flip sync behavior at
/// runtime without a restart.
pub mod global_config {
    use crate::types::EntityKind;

    pub const DEFAULT_SYNC_INTERVAL_SECONDS: &str = "default_sync_interval_seconds";
    pub const MIN_SYNC_INTERVAL_SECONDS: &str = "min_sync_interval_seconds";
    pub const REPLICATION_WORKER_COUNT: &str = "replication_worker_count";
    pub const QUEUE_CHECK_INTERVAL_SECONDS: &str = "queue_check_interval_seconds";

    /// `auto_<kind>_sync_enabled`
    pub fn sync_enabled_key(kind: EntityKind) -> String {
        format!("auto_{}_sync_enabled", kind.as_str())
    }

    /// `<kind>_sync_interval_seconds`
    pub fn sync_interval_key(kind: EntityKind) -> String {
        format!("{}_sync_interval_seconds", kind.as_str())
    }

    /// Seed values written at first startup.
    pub fn defaults() -> Vec<(String, String)> {
        let mut out = vec![
            (DEFAULT_SYNC_INTERVAL_SECONDS.to_string(), "60".to_string()),
            (MIN_SYNC_INTERVAL_SECONDS.to_string(), "10".to_string()),
            (REPLICATION_WORKER_COUNT.to_string(), "5".to_string()),
            (QUEUE_CHECK_INTERVAL_SECONDS.to_string(), "10".to_string()),
        ];
        for kind in EntityKind::ALL {
            out.push((sync_enabled_key(kind), "true".to_string()));
            out.push((sync_interval_key(kind), "30".to_string()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityKind;

    #[test]
    fn test_defaults() {
        let config = SahabConfig::default();
        assert_eq!(config.server.port, 9400);
        assert_eq!(config.cluster.health_check_interval_secs, 10);
    }

    #[test]
    fn test_global_config_keys() {
        assert_eq!(
            global_config::sync_enabled_key(EntityKind::Tenant),
            "auto_tenant_sync_enabled"
        );
        assert_eq!(
            global_config::sync_interval_key(EntityKind::AccessKey),
            "access_key_sync_interval_seconds"
        );

        let defaults = global_config::defaults();
        assert!(defaults
            .iter()
            .any(|(k, v)| k == "replication_worker_count" && v == "5"));
        assert!(defaults
            .iter()
            .any(|(k, v)| k == "auto_idp_provider_sync_enabled" && v == "true"));
    }

    #[test]
    fn test_parse_toml() {
        let raw = r#"
            [server]
            bind_address = "127.0.0.1"
            port = 9500

            [cluster]
            node_name = "node-a"
            region = "eu-west"
            endpoint = "http://node-a:9500"
            health_check_interval_secs = 5
            tombstone_retention_hours = 24
            deletion_sync_interval_secs = 30
            rate_limit_rps = 25.0
            rate_limit_burst = 50
            location_cache_ttl_secs = 60
        "#;
        let config: SahabConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.server.port, 9500);
        assert_eq!(config.cluster.region, "eu-west");
        assert_eq!(config.database.url, DatabaseConfig::default().url);
    }
}
