// Copyright (c) 2025 Workflow Engine Team
// SPDX-License-Identifier: Apache-2.0

//! Retry/backoff executor for the Task Executor (spec §4.5): exponential
//! backoff with a per-attempt cap, retrying network errors and 5xx
//! responses but never 4xx.

use crate::error::{OrchestratorError, Result};
use crate::model::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// A concrete retry/backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            multiplier,
            max_delay,
        }
    }

    /// `backoffMs * 2^(N-1)` for attempt `n` (1-indexed), capped at
    /// `max_delay`, jittered by up to ±20% to de-synchronize concurrent
    /// retries of the same downstream.
    fn delay_for_attempt(&self, n: u32) -> Duration {
        let exponent = n.saturating_sub(1);
        let raw_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent as i32);
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);
        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        Duration::from_millis((capped_ms * jitter) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(cfg: RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            initial_delay: Duration::from_millis(cfg.backoff_ms),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Drives a fallible async operation through a [`RetryPolicy`], retrying
/// only errors for which [`OrchestratorError::is_retryable`] is true.
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Returns the number of attempts actually made for the last `execute`
    /// call only when the caller tracks it via [`Self::execute_counted`];
    /// most callers use [`Self::execute`].
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_counted(&mut operation).await.map(|(value, _)| value)
    }

    /// Same as [`Self::execute`] but also returns the number of attempts
    /// made, for callers (the Task Executor) that must record `attempts`
    /// on the step result.
    pub async fn execute_counted<F, Fut, T>(&self, operation: &mut F) -> Result<(T, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok((value, attempt)),
                Err(err) => {
                    let exhausted = attempt >= self.policy.max_attempts;
                    if exhausted || !err.is_retryable() {
                        if exhausted && err.is_retryable() {
                            warn!(attempts = attempt, "retry attempts exhausted");
                        }
                        return Err(err);
                    }
                    let delay = self.policy.delay_for_attempt(attempt);
                    debug!(attempt, ?delay, error = %err, "retrying after backoff");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retries_up_to_max_attempts_on_5xx() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(1), 2.0, Duration::from_millis(10));
        let executor = RetryExecutor::new(policy);
        let calls_clone = calls.clone();
        let result: Result<()> = executor
            .execute(|| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(OrchestratorError::HttpError {
                        status: 500,
                        body: "boom".into(),
                    })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_4xx() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(1), 2.0, Duration::from_millis(10));
        let executor = RetryExecutor::new(policy);
        let calls_clone = calls.clone();
        let result: Result<()> = executor
            .execute(|| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(OrchestratorError::HttpError {
                        status: 404,
                        body: "nope".into(),
                    })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(5, Duration::from_millis(1), 2.0, Duration::from_millis(10));
        let executor = RetryExecutor::new(policy);
        let calls_clone = calls.clone();
        let result = executor
            .execute(|| {
                let calls = calls_clone.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(OrchestratorError::TransportError("dns".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
