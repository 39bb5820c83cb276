//! Retry with per-attempt timeout and backoff.
//!
//! Model loading goes through this one combinator instead of hand-rolled timeout races
//! at every call site.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// How long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    None,
    /// `step * attempt` after the n-th failure.
    Linear(Duration),
}

impl Backoff {
    fn delay_after(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Linear(step) => step.saturating_mul(attempt),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Upper bound for a single attempt; `None` waits forever.
    pub attempt_timeout: Option<Duration>,
    /// Operation name for logging.
    pub operation: String,
}

impl RetryPolicy {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
            attempt_timeout: None,
            operation: operation.into(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempt(s): {reason}")]
pub struct RetryError {
    pub operation: String,
    pub attempts: u32,
    pub reason: String,
}

/// Runs `operation` until it succeeds or the policy is exhausted. A timed-out attempt
/// is dropped (and therefore cancelled) before the next one starts.
pub async fn retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = match policy.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("timed out after {limit:?}")),
            },
            None => operation().await.map_err(|e| e.to_string()),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(reason) if attempt < policy.max_attempts => {
                let delay = policy.backoff.delay_after(attempt);
                debug!(
                    operation = %policy.operation,
                    attempt,
                    ?delay,
                    %reason,
                    "attempt failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(reason) => {
                return Err(RetryError {
                    operation: policy.operation.clone(),
                    attempts: attempt,
                    reason,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_schedules() {
        let linear = Backoff::Linear(Duration::from_millis(100));
        assert_eq!(linear.delay_after(1), Duration::from_millis(100));
        assert_eq!(linear.delay_after(3), Duration::from_millis(300));
        assert_eq!(Backoff::None.delay_after(5), Duration::ZERO);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new("flaky").with_max_attempts(3);
        let counter = calls.clone();
        let result = retry(&policy, || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(format!("attempt {n}")) } else { Ok(n) }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reports_the_last_failure() {
        let policy = RetryPolicy::new("doomed").with_max_attempts(2);
        let err = retry(&policy, || async { Err::<(), _>("nope") })
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(err.reason, "nope");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out() {
        let policy = RetryPolicy::new("slow")
            .with_max_attempts(2)
            .with_attempt_timeout(Duration::from_secs(1));
        let err = retry(&policy, || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<(), String>(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 2);
        assert!(err.reason.contains("timed out"));
    }
}
