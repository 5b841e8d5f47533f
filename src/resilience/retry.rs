use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::circuit_breaker::{BreakerConfig, CallError, CircuitBreaker};
use crate::error::Classify;

/// How many times to try, and how long to wait between tries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// Backoff schedule. Attempt `i` (0-indexed) waits `delays[min(i, len-1)]`
    /// before the next attempt. Empty means no waiting.
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_retries,
            delays,
        }
    }

    /// delays = base * 2^i for each retry.
    pub fn exponential(max_retries: u32, base: Duration) -> Self {
        let delays = (0..max_retries.max(1))
            .map(|i| base * 2u32.saturating_pow(i))
            .collect();
        Self {
            max_retries,
            delays,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay to sleep after the failed attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.delays.last() {
            None => Duration::ZERO,
            Some(last) => self
                .delays
                .get(attempt as usize)
                .copied()
                .unwrap_or(*last),
        }
    }
}

/// Repeats an operation through a circuit breaker until it succeeds or the
/// attempt budget runs out.
///
/// An open circuit is treated like any other failure: it consumes an attempt
/// and waits the normal backoff, which lets a short outage be waited out
/// inside the budget.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl RetryStrategy {
    /// Strategy with its own private breaker.
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_breaker(
            policy,
            Arc::new(CircuitBreaker::new("default", BreakerConfig::default())),
        )
    }

    pub fn with_breaker(policy: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self { policy, breaker }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `op` up to `max_retries + 1` times. `op` receives the 0-indexed
    /// attempt number. On exhaustion the last error is returned unchanged.
    pub async fn execute<T, E, F, Fut>(&self, mut op: F) -> Result<T, CallError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let attempts = self.policy.attempts();
        let mut attempt = 0;
        loop {
            match self.breaker.call(|| op(attempt)).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(breaker = self.breaker.name(), attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt + 1 >= attempts => {
                    warn!(
                        breaker = self.breaker.name(),
                        attempts,
                        error = %err,
                        "retry budget exhausted"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    match &err {
                        CallError::CircuitOpen { retry_after, .. } => warn!(
                            breaker = self.breaker.name(),
                            attempt = attempt + 1,
                            max = attempts,
                            retry_after_ms = retry_after.as_millis() as u64,
                            delay_ms = delay.as_millis() as u64,
                            "circuit open, waiting before next attempt"
                        ),
                        CallError::Failed(e) => warn!(
                            breaker = self.breaker.name(),
                            attempt = attempt + 1,
                            max = attempts,
                            kind = %e.kind(),
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "attempt failed, retrying"
                        ),
                    }
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
