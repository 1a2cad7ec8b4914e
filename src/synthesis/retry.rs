/*!
 * Retry with a fixed backoff schedule.
 *
 * One attempt is made per schedule entry. After a failed attempt the matching
 * delay is slept, except after the last attempt. Errors that report
 * themselves as non-retryable end the schedule early.
 */

use log::debug;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::errors::ProviderError;

/// Default schedule in milliseconds
pub const DEFAULT_RETRY_DELAYS_MS: [u64; 11] = [500, 1000, 2000, 3000, 4000, 5000, 6000, 7000, 8000, 9000, 10000];

/// Errors that can tell whether another attempt may succeed
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

impl RetryableError for ProviderError {
    fn is_retryable(&self) -> bool {
        ProviderError::is_retryable(self)
    }
}

/// Fixed ascending backoff schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_millis(&DEFAULT_RETRY_DELAYS_MS)
    }
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn from_millis(delays_ms: &[u64]) -> Self {
        Self::new(delays_ms.iter().map(|ms| Duration::from_millis(*ms)).collect())
    }

    /// A single attempt without retries
    pub fn no_retry() -> Self {
        Self::new(Vec::new())
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Total number of attempts, at least one
    pub fn max_attempts(&self) -> usize {
        self.delays.len().max(1)
    }

    /// Run `operation` until it succeeds or the schedule is used up.
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> RetryOutcome<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + Display,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match operation(attempt).await {
                Ok(value) => return RetryOutcome::Success { value, attempts: attempt },
                Err(error) => error,
            };

            if !error.is_retryable() {
                debug!("{}: attempt {} failed permanently: {}", label, attempt, error);
                return RetryOutcome::Failure { error, attempts: attempt };
            }

            if attempt >= max_attempts {
                debug!("{}: attempt {} failed, schedule exhausted: {}", label, attempt, error);
                return RetryOutcome::Exhausted {
                    last_error: error,
                    attempts: attempt,
                };
            }

            let delay = self.delays[attempt - 1];
            debug!(
                "{}: attempt {}/{} failed: {}. Retrying in {:?}",
                label, attempt, max_attempts, error, delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Result of a retried operation
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// Operation succeeded
    Success { value: T, attempts: usize },
    /// Operation failed with a non-retryable error
    Failure { error: E, attempts: usize },
    /// All attempts failed
    Exhausted { last_error: E, attempts: usize },
}

impl<T, E> RetryOutcome<T, E> {
    /// Number of attempts made
    pub fn attempts(&self) -> usize {
        match self {
            RetryOutcome::Success { attempts, .. }
            | RetryOutcome::Failure { attempts, .. }
            | RetryOutcome::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success { .. })
    }
}
