//! Bucket location cache
//!
//! TTL map of bucket name to home node id. Expired entries answer as a
//! miss without being removed; a background sweep deletes them. Migration
//! completion invalidates the moved bucket explicitly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

#[derive(Debug)]
struct CacheEntry {
    node_id: String,
    expires_at: Instant,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
}

pub struct LocationCache {
    ttl: Duration,
    sweep_interval: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl LocationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sweep_interval: Duration::from_secs(60),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Current location for `bucket`, or `None` on a miss or expired entry.
    pub fn get(&self, bucket: &str) -> Option<String> {
        let entries = self.entries.read();
        entries.get(bucket).and_then(|entry| {
            if Instant::now() < entry.expires_at {
                Some(entry.node_id.clone())
            } else {
                None
            }
        })
    }

    /// Insert or overwrite with a fresh TTL.
    pub fn set(&self, bucket: impl Into<String>, node_id: impl Into<String>) {
        self.entries.write().insert(
            bucket.into(),
            CacheEntry {
                node_id: node_id.into(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Explicit invalidation, called when a bucket migrates.
    pub fn delete(&self, bucket: &str) {
        self.entries.write().remove(bucket);
    }

    pub fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| now < e.expires_at);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Swept expired location cache entries");
        }
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.read();
        let expired = entries.values().filter(|e| now >= e.expires_at).count();
        CacheStats {
            total: entries.len(),
            valid: entries.len() - expired,
            expired,
        }
    }

    pub fn spawn_sweeper(
        self: &Arc<Self>,
        shutdown: Arc<RwLock<bool>>,
    ) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache.sweep_interval);
            loop {
                ticker.tick().await;
                if *shutdown.read() {
                    break;
                }
                cache.sweep();
            }
            debug!("Location cache sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete() {
        let cache = LocationCache::new(Duration::from_secs(60));
        assert_eq!(cache.get("b"), None);

        cache.set("b", "n1");
        assert_eq!(cache.get("b").as_deref(), Some("n1"));

        // Overwrite
        cache.set("b", "n2");
        assert_eq!(cache.get("b").as_deref(), Some("n2"));

        cache.delete("b");
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn test_expiry_is_lazy() {
        let cache = LocationCache::new(Duration::from_millis(100));
        cache.set("b", "n1");
        assert_eq!(cache.get("b").as_deref(), Some("n1"));

        std::thread::sleep(Duration::from_millis(150));

        // Expired entries answer as a miss but stay in the map until swept
        assert_eq!(cache.get("b"), None);
        let stats = cache.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.valid, 0);

        cache.sweep();
        assert_eq!(cache.stats().total, 0);
    }
}
