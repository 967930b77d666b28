//! Remote-call retry utilities.
//!
//! Provides bounded retry with a fixed delay for outbound service calls.
//! Errors classify themselves through [`Retryable`]; only transient
//! (transport-level) failures are retried, everything else returns on the
//! first attempt.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Classifies an error as transient (worth another attempt) or fatal.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempt budget and inter-attempt delay.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// A policy that performs exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// Execute `f`, retrying transient failures up to the attempt budget.
    ///
    /// The last error is returned unwrapped; callers decide how to surface
    /// an exhausted budget.
    pub async fn run<F, Fut, T, E>(&self, operation: &str, f: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut attempt = 1u32;

        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    metrics::counter!("fiscal_retry_attempts_total").increment(1);
                    warn!(
                        operation,
                        attempt,
                        error = %err,
                        delay_ms = self.delay.as_millis() as u64,
                        "transient failure, retrying after delay"
                    );
                    sleep(self.delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(operation, attempt, error = %err, "call failed, not retrying");
                    return Err(err);
                }
            }
        }
    }
}
