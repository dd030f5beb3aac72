//! Retry classification and exponential backoff

use std::time::Duration;

use tracing::debug;

use super::error::{SchedulerError, WorkError};

/// What to do with a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue after `delay`
    Retry { delay: Duration },

    /// Settle the request with this terminal error
    Fail(SchedulerError),
}

/// Backoff policy: `min(base * 2^retries, max)`, up to `max_retries` retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Delay before the retry that follows `retries` earlier retries
    pub fn delay_for(&self, retries: u32) -> Duration {
        let factor = 2u32.checked_pow(retries).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Classify a failure of a request that has already been retried `retries` times
    pub fn decide(&self, error: WorkError, retries: u32) -> RetryDecision {
        debug!(%error, retries, max_retries = self.max_retries, "RetryPolicy::decide: called");
        if !error.is_retryable() {
            debug!("RetryPolicy::decide: permanent error");
            return RetryDecision::Fail(SchedulerError::Work(error));
        }
        if retries >= self.max_retries {
            debug!("RetryPolicy::decide: retries exhausted");
            return RetryDecision::Fail(SchedulerError::RetryExhausted {
                attempts: retries + 1,
                last_error: error,
            });
        }
        RetryDecision::Retry {
            delay: self.delay_for(retries),
        }
    }
}
