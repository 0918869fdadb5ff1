//! Bounded Retry
//!
//! Fixed number of attempts at a constant interval. Used for best-effort
//! cleanup where the cluster may briefly refuse a delete.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

const DEFAULT_STEPS: u32 = 5;
const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// How many times to try and how long to wait between tries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least one is always made
    pub steps: u32,
    /// Pause between attempts
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl RetryPolicy {
    pub fn new(steps: u32, interval: Duration) -> Self {
        Self { steps, interval }
    }

    /// Run `attempt` until it succeeds or the policy is exhausted.
    ///
    /// The closure receives the 1-based attempt number. Exhaustion yields
    /// [`Error::RetryExhausted`] carrying the last failure.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let steps = self.steps.max(1);
        let mut last_error = String::new();

        for n in 1..=steps {
            match attempt(n).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!(operation, attempt = n, error = %e, "attempt failed");
                    last_error = e.to_string();
                }
            }

            if n < steps {
                tokio::time::sleep(self.interval).await;
            }
        }

        Err(Error::RetryExhausted {
            operation: operation.to_string(),
            attempts: steps,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let policy = RetryPolicy::default();
        let start = Instant::now();

        let result = policy
            .run("delete pod", |n| async move {
                if n < 3 {
                    Err(Error::Internal("conflict".into()))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        // two pauses between three attempts
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted() {
        let policy = RetryPolicy::new(4, Duration::from_secs(1));
        let mut calls = 0;

        let result: Result<()> = policy
            .run("delete claim", |n| {
                calls += 1;
                async move { Err(Error::Internal(format!("failure {}", n))) }
            })
            .await;

        assert_eq!(calls, 4);
        assert_matches!(
            result,
            Err(Error::RetryExhausted { attempts: 4, ref last_error, .. }) if last_error == "Internal error: failure 4"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_steps_still_attempts_once() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1));
        let result = policy.run("noop", |_| async { Ok(()) }).await;
        assert!(result.is_ok());
    }
}
