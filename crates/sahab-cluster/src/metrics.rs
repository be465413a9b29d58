//! In-process cluster metrics
//!
//! Counters are atomics updated lock-free; latency trackers keep
//! `(count, sum, min, max)` under a small mutex. A snapshot renders the
//! whole tree as nested JSON for the status surface, and an optional
//! reporter logs it periodically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tracing::{debug, info};

#[derive(Debug, Default)]
struct LatencyInner {
    count: u64,
    sum_ms: f64,
    min_ms: f64,
    max_ms: f64,
}

/// Latency aggregate with `(count, sum, min, max)`.
#[derive(Debug, Default)]
pub struct LatencyTracker {
    inner: Mutex<LatencyInner>,
}

impl LatencyTracker {
    pub fn record(&self, latency: Duration) {
        let ms = latency.as_secs_f64() * 1000.0;
        let mut inner = self.inner.lock();
        if inner.count == 0 || ms < inner.min_ms {
            inner.min_ms = ms;
        }
        if ms > inner.max_ms {
            inner.max_ms = ms;
        }
        inner.count += 1;
        inner.sum_ms += ms;
    }

    pub fn snapshot(&self) -> Value {
        let inner = self.inner.lock();
        let avg = if inner.count > 0 {
            inner.sum_ms / inner.count as f64
        } else {
            0.0
        };
        json!({
            "count": inner.count,
            "sum_ms": inner.sum_ms,
            "min_ms": inner.min_ms,
            "max_ms": inner.max_ms,
            "avg_ms": avg,
        })
    }
}

/// Request/success/failure counters plus latency for one call family.
#[derive(Debug, Default)]
pub struct AggregateSeries {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    latency: LatencyTracker,
}

impl AggregateSeries {
    pub fn record(&self, success: bool, latency: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.latency.record(latency);
    }

    pub fn snapshot(&self) -> Value {
        json!({
            "requests": self.requests.load(Ordering::Relaxed),
            "successes": self.successes.load(Ordering::Relaxed),
            "failures": self.failures.load(Ordering::Relaxed),
            "latency_ms": self.latency.snapshot(),
        })
    }
}

#[derive(Debug, Default)]
pub struct ClusterMetrics {
    pub bucket_aggregation: AggregateSeries,
    pub quota_aggregation: AggregateSeries,
    pub node_requests: AggregateSeries,
    circuit_open_total: AtomicU64,
    rate_limit_allowed_total: AtomicU64,
    rate_limit_denied_total: AtomicU64,
}

impl ClusterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_circuit_open(&self) {
        self.circuit_open_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit(&self, allowed: bool) {
        if allowed {
            self.rate_limit_allowed_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rate_limit_denied_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Render the full metric tree.
    pub fn snapshot(&self) -> Value {
        json!({
            "bucket_aggregation": self.bucket_aggregation.snapshot(),
            "quota_aggregation": self.quota_aggregation.snapshot(),
            "node_requests": self.node_requests.snapshot(),
            "circuit_breaker": {
                "open_total": self.circuit_open_total.load(Ordering::Relaxed),
            },
            "rate_limiter": {
                "allowed_total": self.rate_limit_allowed_total.load(Ordering::Relaxed),
                "denied_total": self.rate_limit_denied_total.load(Ordering::Relaxed),
            },
        })
    }

    /// Periodically log the snapshot at info level.
    pub fn spawn_reporter(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: Arc<RwLock<bool>>,
    ) -> tokio::task::JoinHandle<()> {
        let metrics = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if *shutdown.read() {
                    break;
                }
                info!(stats = %metrics.snapshot(), "Cluster metrics");
            }
            debug!("Metrics reporter stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_tracker_min_max() {
        let tracker = LatencyTracker::default();
        tracker.record(Duration::from_millis(20));
        tracker.record(Duration::from_millis(5));
        tracker.record(Duration::from_millis(50));

        let snap = tracker.snapshot();
        assert_eq!(snap["count"], 3);
        assert!((snap["min_ms"].as_f64().unwrap() - 5.0).abs() < 1.0);
        assert!((snap["max_ms"].as_f64().unwrap() - 50.0).abs() < 1.0);
        assert!((snap["avg_ms"].as_f64().unwrap() - 25.0).abs() < 1.0);
    }

    #[test]
    fn test_series_counts() {
        let series = AggregateSeries::default();
        series.record(true, Duration::from_millis(1));
        series.record(true, Duration::from_millis(1));
        series.record(false, Duration::from_millis(1));

        let snap = series.snapshot();
        assert_eq!(snap["requests"], 3);
        assert_eq!(snap["successes"], 2);
        assert_eq!(snap["failures"], 1);
    }

    #[test]
    fn test_snapshot_tree_shape() {
        let metrics = ClusterMetrics::new();
        metrics.record_circuit_open();
        metrics.record_rate_limit(false);
        metrics.record_rate_limit(true);

        let snap = metrics.snapshot();
        assert_eq!(snap["circuit_breaker"]["open_total"], 1);
        assert_eq!(snap["rate_limiter"]["denied_total"], 1);
        assert_eq!(snap["rate_limiter"]["allowed_total"], 1);
        assert!(snap["quota_aggregation"]["latency_ms"].is_object());
    }
}
