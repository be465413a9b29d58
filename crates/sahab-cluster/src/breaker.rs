//! Per-peer circuit breakers
//!
//! Three states: Closed admits calls and counts consecutive failures; Open
//! fails fast until the timeout since the last failure elapses; HalfOpen
//! admits probes and closes after enough consecutive successes. One breaker
//! per peer, created lazily by the registry and dropped on deregistration.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::warn;

use crate::error::{ClusterError, ClusterResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures in Closed before the circuit opens
    pub failure_threshold: u32,
    /// Consecutive successes in HalfOpen before the circuit closes
    pub success_threshold: u32,
    /// How long Open fails fast after the last recorded failure
    pub timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
}

/// Point-in-time breaker view for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    /// Seconds until an Open circuit admits the next probe; zero when not
    /// Open or already admissible.
    pub retry_in_secs: f64,
}

pub struct CircuitBreaker {
    peer_id: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(peer_id: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            peer_id: peer_id.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                last_failure: None,
            }),
        }
    }

    /// Run `f` through the breaker. An Open circuit fails fast without
    /// invoking `f`; the outcome of `f` feeds the state machine.
    pub async fn call<T, Fut, F>(&self, f: F) -> ClusterResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClusterResult<T>>,
    {
        self.try_acquire()?;
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    /// Admit or reject a call based on the current state.
    pub fn try_acquire(&self) -> ClusterResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.config.timeout);
                if elapsed >= self.config.timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.successes = 0;
                    Ok(())
                } else {
                    Err(ClusterError::CircuitOpen(self.peer_id.clone()))
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.last_failure = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.failures = 0;
                    warn!(peer = %self.peer_id, "Circuit opened");
                    counter!("sahab_circuit_opened_total", "peer" => self.peer_id.clone())
                        .increment(1);
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.successes = 0;
                warn!(peer = %self.peer_id, "Circuit reopened from half-open");
                counter!("sahab_circuit_opened_total", "peer" => self.peer_id.clone()).increment(1);
            }
            CircuitState::Open => {}
        }
    }

    /// Force the breaker back to Closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.successes = 0;
        inner.last_failure = None;
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        let retry_in_secs = match inner.state {
            CircuitState::Open => inner
                .last_failure
                .map(|at| {
                    self.config
                        .timeout
                        .saturating_sub(at.elapsed())
                        .as_secs_f64()
                })
                .unwrap_or(0.0),
            _ => 0.0,
        };
        BreakerStats {
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
            retry_in_secs,
        }
    }
}

/// Lazily creates one breaker per peer id.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, peer_id: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(peer_id) {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write();
        Arc::clone(
            breakers
                .entry(peer_id.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(peer_id, self.config.clone()))),
        )
    }

    /// Drop the breaker for a deregistered peer.
    pub fn remove(&self, peer_id: &str) {
        self.breakers.write().remove(peer_id);
    }

    pub fn stats(&self) -> HashMap<String, BreakerStats> {
        self.breakers
            .read()
            .iter()
            .map(|(id, b)| (id.clone(), b.stats()))
            .collect()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_breaker(failures: u32, successes: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "peer-1",
            BreakerConfig {
                failure_threshold: failures,
                success_threshold: successes,
                timeout: Duration::from_millis(timeout_ms),
            },
        )
    }

    async fn failing(breaker: &CircuitBreaker) -> ClusterResult<()> {
        breaker
            .call(|| async { Err::<(), _>(ClusterError::Transport("boom".into())) })
            .await
    }

    async fn succeeding(breaker: &CircuitBreaker) -> ClusterResult<()> {
        breaker.call(|| async { Ok(()) }).await
    }

    #[tokio::test]
    async fn test_open_after_threshold_failures() {
        let breaker = test_breaker(3, 2, 100);

        for _ in 0..3 {
            assert!(failing(&breaker).await.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        // Failure count zeroed on the transition
        assert_eq!(breaker.stats().failures, 0);
    }

    #[tokio::test]
    async fn test_open_fails_fast_without_invoking() {
        let breaker = test_breaker(3, 2, 60_000);
        for _ in 0..3 {
            let _ = failing(&breaker).await;
        }

        let invoked = AtomicU32::new(0);
        let result = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ClusterError::CircuitOpen(_))));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_recovery() {
        let breaker = test_breaker(3, 2, 100);
        for _ in 0..3 {
            let _ = failing(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;

        // First success after the timeout moves to HalfOpen
        assert!(succeeding(&breaker).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Second success closes the circuit
        assert!(succeeding(&breaker).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = test_breaker(1, 2, 50);
        let _ = failing(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(failing(&breaker).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count_in_closed() {
        let breaker = test_breaker(3, 2, 100);

        let _ = failing(&breaker).await;
        let _ = failing(&breaker).await;
        assert!(succeeding(&breaker).await.is_ok());
        assert_eq!(breaker.stats().failures, 0);

        // Two more failures still do not open the circuit
        let _ = failing(&breaker).await;
        let _ = failing(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_manual_reset() {
        let breaker = test_breaker(1, 1, 60_000);
        let _ = failing(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(succeeding(&breaker).await.is_ok());
    }

    #[test]
    fn test_registry_lazy_create_and_remove() {
        let registry = BreakerRegistry::default();
        let a = registry.get("n1");
        let b = registry.get("n1");
        assert!(Arc::ptr_eq(&a, &b));

        assert_eq!(registry.stats().len(), 1);
        registry.remove("n1");
        assert!(registry.stats().is_empty());
    }
}
