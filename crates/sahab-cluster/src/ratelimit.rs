//! Per-IP token bucket rate limiter
//!
//! Guards the inbound internal endpoints. Buckets refill continuously at
//! `requests_per_second` up to `burst_size`; a request consumes one token.
//! Idle buckets are reclaimed by a periodic sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub requests_per_second: f64,
    pub burst_size: u32,
    pub sweep_interval: Duration,
    pub stale_after: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 50.0,
            burst_size: 100,
            sweep_interval: Duration::from_secs(300),
            stale_after: Duration::from_secs(600),
        }
    }
}

#[derive(Debug)]
struct RateBucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RateLimiterStats {
    pub active_buckets: usize,
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: RwLock<HashMap<String, RateBucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Whether a request from `client_ip` may proceed. Consumes one token
    /// on success.
    pub fn allow(&self, client_ip: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.write();
        let bucket = buckets.entry(client_ip.to_string()).or_insert(RateBucket {
            tokens: self.config.burst_size as f64,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.config.requests_per_second)
            .min(self.config.burst_size as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            counter!("sahab_rate_limit_allowed_total").increment(1);
            true
        } else {
            counter!("sahab_rate_limit_denied_total").increment(1);
            false
        }
    }

    /// Drop buckets that have been idle past the staleness window.
    pub fn sweep(&self) {
        let stale_after = self.config.stale_after;
        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, b| b.last_refill.elapsed() < stale_after);
        let removed = before - buckets.len();
        if removed > 0 {
            debug!(removed, "Reclaimed stale rate limit buckets");
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            active_buckets: self.buckets.read().len(),
        }
    }

    /// Background sweeper; exits when `shutdown` flips.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        shutdown: Arc<RwLock<bool>>,
    ) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.config.sweep_interval);
            loop {
                ticker.tick().await;
                if *shutdown.read() {
                    break;
                }
                limiter.sweep();
            }
            debug!("Rate limiter sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rps: f64, burst: u32) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            requests_per_second: rps,
            burst_size: burst,
            sweep_interval: Duration::from_secs(300),
            stale_after: Duration::from_millis(50),
        })
    }

    #[test]
    fn test_burst_then_denial() {
        let limiter = limiter(1.0, 3);

        // A fresh bucket admits exactly the burst
        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.1"));
        assert!(!limiter.allow("10.0.0.1"));
    }

    #[test]
    fn test_refill_allows_again() {
        let limiter = limiter(10.0, 2);

        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.1"));
        assert!(!limiter.allow("10.0.0.1"));

        // 1/rps = 100ms buys one token back
        std::thread::sleep(Duration::from_millis(120));
        assert!(limiter.allow("10.0.0.1"));
    }

    #[test]
    fn test_buckets_are_per_ip() {
        let limiter = limiter(1.0, 1);

        assert!(limiter.allow("10.0.0.1"));
        assert!(!limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.2"));
    }

    #[test]
    fn test_sweep_reclaims_stale_buckets() {
        let limiter = limiter(1.0, 1);
        limiter.allow("10.0.0.1");
        assert_eq!(limiter.stats().active_buckets, 1);

        std::thread::sleep(Duration::from_millis(80));
        limiter.sweep();
        assert_eq!(limiter.stats().active_buckets, 0);
    }
}
