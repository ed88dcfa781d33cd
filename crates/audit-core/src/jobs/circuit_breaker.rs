//! Circuit Breaker: three-state failure isolation (closed/open/half-open).
//!
//! New module -- the teacher has no equivalent, so this follows general
//! async-Rust state-machine idioms used elsewhere in the workspace
//! (`Arc<RwLock<_>>`-guarded state, `chrono` timestamps for elapsed-time
//! checks, a metrics snapshot struct mirroring `ExecutorMetricsSnapshot`).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            monitoring_period: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    transitions: AtomicU64,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
    counters: Counters,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub failure_rate: f64,
    pub transitions: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                last_failure_at: None,
            }),
            counters: Counters::default(),
        }
    }

    pub fn shared(config: CircuitBreakerConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    /// Whether a call may proceed right now. Transitions open -> half-open
    /// once `reset_timeout` has elapsed since the circuit opened.
    pub async fn can_execute(&self) -> bool {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| Utc::now() - t)
                    .unwrap_or_default();
                if elapsed >= chrono::Duration::from_std(self.config.reset_timeout).unwrap() {
                    inner.state = CircuitState::HalfOpen;
                    self.counters.transitions.fetch_add(1, Ordering::Relaxed);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn on_success(&self) {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        self.counters.success.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                self.counters.transitions.fetch_add(1, Ordering::Relaxed);
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub async fn on_failure(&self) {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        self.counters.failure.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.write().await;
        inner.last_failure_at = Some(Utc::now());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Utc::now());
                self.counters.transitions.fetch_add(1, Ordering::Relaxed);
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Utc::now());
                    self.counters.transitions.fetch_add(1, Ordering::Relaxed);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    /// Background health probe hook per §4.4: force a half-open probe if
    /// the probe reports healthy while open, or count a failure if it
    /// reports unhealthy while closed.
    pub async fn record_health_probe(&self, healthy: bool) {
        let state = self.state().await;
        match (state, healthy) {
            (CircuitState::Open, true) => {
                let mut inner = self.inner.write().await;
                if inner.state == CircuitState::Open {
                    inner.state = CircuitState::HalfOpen;
                    self.counters.transitions.fetch_add(1, Ordering::Relaxed);
                }
            }
            (CircuitState::Closed, false) => self.on_failure().await,
            _ => {}
        }
    }

    pub async fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.read().await;
        let total = self.counters.total.load(Ordering::Relaxed);
        let failure = self.counters.failure.load(Ordering::Relaxed);
        CircuitBreakerSnapshot {
            state: inner.state,
            total,
            success: self.counters.success.load(Ordering::Relaxed),
            failure,
            failure_rate: if total > 0 { failure as f64 / total as f64 } else { 0.0 },
            transitions: self.counters.transitions.load(Ordering::Relaxed),
            last_failure_at: inner.last_failure_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout: Duration::from_millis(20),
            monitoring_period: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(config());
        assert_eq!(cb.state().await, CircuitState::Closed);
        cb.on_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        cb.on_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.can_execute().await);
    }

    #[tokio::test]
    async fn half_open_after_timeout_then_closes_on_success() {
        let cb = CircuitBreaker::new(config());
        cb.on_failure().await;
        cb.on_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cb.can_execute().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.on_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new(config());
        cb.on_failure().await;
        cb.on_failure().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cb.can_execute().await);

        cb.on_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }
}
