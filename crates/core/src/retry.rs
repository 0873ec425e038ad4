//! Retry policy shared by the transcription and translation adapters.
//!
//! Every attempt is bounded by `attempt_timeout`. Rate-limit and server errors
//! back off exponentially; timeouts wait a shorter fixed delay.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ExternalError;

/// Attempt count, backoff schedule and retryable predicate.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first rate-limit/server failure, doubled afterwards.
    pub base_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Delay after a timed out attempt.
    pub timeout_delay: Duration,
    /// Hard limit for one attempt.
    pub attempt_timeout: Duration,
    /// Decides whether a failure is worth another attempt.
    pub retryable: fn(&ExternalError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            timeout_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(60),
            retryable: ExternalError::is_retryable,
        }
    }
}

/// The last error once a policy gives up.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryExhausted {
    pub error: ExternalError,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Policy for whole-file transcription: long attempts, slow backoff.
    pub fn transcription() -> Self {
        Self {
            base_backoff: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(300),
            ..Default::default()
        }
    }

    /// Policy for a single segment translation.
    pub fn translation() -> Self {
        Self {
            max_backoff: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(30),
            ..Default::default()
        }
    }

    /// Same schedule with every delay shrunk to `delay`; used by tests.
    pub fn immediate(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_backoff: delay,
            max_backoff: delay,
            timeout_delay: delay,
            ..Default::default()
        }
    }

    /// Bound each attempt by `timeout`.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32, err: &ExternalError) -> Duration {
        let delay = match err {
            ExternalError::Timeout(_) => self.timeout_delay,
            ExternalError::RateLimited {
                retry_after: Some(hint),
            } => (*hint).max(self.backoff(attempt)),
            _ => self.backoff(attempt),
        };
        delay.min(self.max_backoff)
    }

    /// Uncapped exponential delay for `attempt`.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1u32 << exp)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent.
    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T, RetryExhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExternalError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.attempt_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(ExternalError::Timeout(self.attempt_timeout)),
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if attempt >= max_attempts || !(self.retryable)(&err) {
                warn!(
                    "{} failed after {} attempt(s): {}",
                    operation_name, attempt, err
                );
                return Err(RetryExhausted {
                    error: err,
                    attempts: attempt,
                });
            }
            let delay = self.delay_after(attempt, &err);
            debug!(
                "{} attempt {} failed, retrying in {:?}: {}",
                operation_name, attempt, delay, err
            );
            tokio::time::sleep(delay).await;
        }
    }
}
