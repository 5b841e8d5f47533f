//! Per-provider circuit breaker.
//!
//! ```text
//! Closed   → Open:     failure_count >= failure_threshold
//! Open     → HalfOpen: recovery_timeout elapsed since last failure
//! HalfOpen → Closed:   trial call succeeds (failure_count = 0)
//! HalfOpen → Open:     trial call fails (timeout window restarts)
//! ```
//!
//! Only failures whose [`ErrorKind`] is in the configured `expected` set are
//! counted; everything else passes through untouched.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{Classify, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    /// Failure kinds that count against provider health.
    pub expected: HashSet<ErrorKind>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            expected: [
                ErrorKind::RateLimited,
                ErrorKind::Server,
                ErrorKind::Network,
                ErrorKind::Timeout,
            ]
            .into_iter()
            .collect(),
        }
    }
}

/// Outcome of a call made through a breaker.
#[derive(Debug)]
pub enum CallError<E> {
    /// The breaker rejected the call without running it.
    CircuitOpen {
        breaker: String,
        retry_after: Duration,
    },
    /// The call ran and failed.
    Failed(E),
}

impl<E> CallError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::CircuitOpen { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            CallError::Failed(e) => Some(e),
            CallError::CircuitOpen { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::CircuitOpen {
                breaker,
                retry_after,
            } => write!(
                f,
                "circuit '{breaker}' open, retry after {:.1}s",
                retry_after.as_secs_f64()
            ),
            CallError::Failed(e) => e.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CallError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CallError::Failed(e) => Some(e),
            CallError::CircuitOpen { .. } => None,
        }
    }
}

/// Point-in-time view of a breaker, for status reporting and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_age: Option<Duration>,
}

#[derive(Debug, Default)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `op` through the breaker.
    ///
    /// The lock is held only around state reads and updates, never across the
    /// awaited call itself.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        if let Err(retry_after) = self.admit() {
            return Err(CallError::CircuitOpen {
                breaker: self.name.clone(),
                retry_after,
            });
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if self.config.expected.contains(&err.kind()) {
                    self.record_failure();
                }
                Err(CallError::Failed(err))
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.inner.lock();
        CircuitBreakerState {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_age: inner.last_failure.map(|t| t.elapsed()),
        }
    }

    /// Operator escape hatch: force the breaker closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = Inner::default();
        info!(breaker = %self.name, "circuit breaker manually reset");
    }

    /// Returns the remaining cool-down when the call must be rejected.
    fn admit(&self) -> Result<(), Duration> {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }
        let elapsed = inner
            .last_failure
            .map(|t| t.elapsed())
            .unwrap_or(self.config.recovery_timeout);
        if elapsed >= self.config.recovery_timeout {
            inner.state = CircuitState::HalfOpen;
            info!(breaker = %self.name, "circuit half-open, allowing trial call");
            Ok(())
        } else {
            Err(self.config.recovery_timeout - elapsed)
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!(breaker = %self.name, "circuit closed after successful call");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        // Admitted before the circuit opened; the current cool-down stands.
        if inner.state == CircuitState::Open {
            return;
        }
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                warn!(breaker = %self.name, "trial call failed, circuit re-opened");
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    "failure threshold reached, circuit opened"
                );
            }
            _ => {}
        }
    }
}

/// One shared breaker per provider, created on first use and never recreated.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone())))
            .clone()
    }

    pub fn snapshot(&self) -> Vec<(String, CircuitBreakerState)> {
        let breakers = self.breakers.lock();
        let mut all: Vec<_> = breakers
            .iter()
            .map(|(name, b)| (name.clone(), b.snapshot()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.lock().values() {
            breaker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::test_support::FakeError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, recovery_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_secs(recovery_secs),
                ..BreakerConfig::default()
            },
        )
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), CallError<FakeError>> {
        b.call(|| async { Err::<(), _>(FakeError::server("boom")) })
            .await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<u32, CallError<FakeError>> {
        b.call(|| async { Ok::<_, FakeError>(7) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_exactly_threshold_failures() {
        let b = breaker(3, 30);

        for i in 1..=3 {
            let err = fail(&b).await.unwrap_err();
            // The threshold-th failure still surfaces the underlying error.
            assert!(
                matches!(err, CallError::Failed(_)),
                "failure {i} should be the real error"
            );
        }
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.snapshot().failure_count, 3);

        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = b
            .call(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FakeError>(())
            })
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(err.to_string(), "circuit 'test' open, retry after 30.0s");
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_success_closes_and_resets_count() {
        let b = breaker(2, 10);
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10) + Duration::from_millis(1)).await;

        assert_eq!(succeed(&b).await.unwrap(), 7);
        let snap = b.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_failure_after_opening_keeps_the_cooldown_window() {
        let b = breaker(1, 30);
        let slow = b.call(|| async {
            tokio::time::sleep(Duration::from_secs(20)).await;
            Err::<(), _>(FakeError::server("slow boom"))
        });
        let (slow, fast) = tokio::join!(slow, fail(&b));
        assert!(matches!(slow, Err(CallError::Failed(_))));
        assert!(matches!(fast, Err(CallError::Failed(_))));
        assert_eq!(b.snapshot().failure_count, 1);

        // 31s after the circuit opened, 11s after the late failure.
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(succeed(&b).await.unwrap(), 7);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens_with_fresh_window() {
        let b = breaker(1, 10);
        let _ = fail(&b).await;
        tokio::time::advance(Duration::from_secs(11)).await;

        // Trial call is attempted and its own error surfaces.
        let err = fail(&b).await.unwrap_err();
        assert!(matches!(err, CallError::Failed(_)));
        assert_eq!(b.state(), CircuitState::Open);

        match succeed(&b).await.unwrap_err() {
            CallError::CircuitOpen { retry_after, .. } => {
                assert_eq!(retry_after, Duration::from_secs(10))
            }
            other => panic!("expected open circuit, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_reports_remaining_cooldown() {
        let b = breaker(1, 60);
        let _ = fail(&b).await;
        tokio::time::advance(Duration::from_secs(45)).await;
        match succeed(&b).await.unwrap_err() {
            CallError::CircuitOpen { retry_after, .. } => {
                assert_eq!(retry_after, Duration::from_secs(15))
            }
            other => panic!("expected open circuit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unexpected_kinds_do_not_trip() {
        let b = breaker(2, 60);
        for _ in 0..5 {
            let err = b
                .call(|| async { Err::<(), _>(FakeError::client("bad input")) })
                .await
                .unwrap_err();
            assert!(matches!(err, CallError::Failed(_)));
        }
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().failure_count, 0);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let b = breaker(3, 60);
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        succeed(&b).await.unwrap();
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().failure_count, 2);
    }

    #[tokio::test]
    async fn reset_forces_closed() {
        let b = breaker(1, 3600);
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(succeed(&b).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn concurrent_failures_keep_state_consistent() {
        let b = Arc::new(breaker(5, 3600));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let b = Arc::clone(&b);
            handles.push(tokio::spawn(async move { fail(&b).await }));
        }
        let mut ran = 0;
        for h in handles {
            if let Err(CallError::Failed(_)) = h.await.unwrap() {
                ran += 1;
            }
        }
        let snap = b.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.failure_count, 5);
        assert!(ran >= 5);
    }

    #[test]
    fn registry_shares_breaker_per_name() {
        let registry = BreakerRegistry::new(BreakerConfig::default());
        let a = registry.get("anthropic");
        let again = registry.get("anthropic");
        let other = registry.get("openai");
        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &other));
        let names: Vec<_> = registry.snapshot().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["anthropic", "openai"]);
    }
}
