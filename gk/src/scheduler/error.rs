//! Scheduler error types

use std::time::Duration;
use thiserror::Error;

/// Failure reported by a unit of work
///
/// The scheduler never looks inside the work payload; it only needs to know
/// whether a failure is worth another attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkError {
    #[error("Rate limited by upstream, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Upstream error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Upstream server error: {0}")]
    Server(String),

    #[error("Work failed: {0}")]
    Failed(String),
}

/// Check if an HTTP status code signals a transient upstream condition
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

impl WorkError {
    /// Build a permanent failure from any displayable error
    pub fn failed(message: impl std::fmt::Display) -> Self {
        WorkError::Failed(message.to_string())
    }

    /// Check if this error is transient and may succeed on another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkError::RateLimited { .. } => true,
            WorkError::Status { status, .. } => is_retryable_status(*status),
            WorkError::Timeout(_) => true,
            WorkError::Server(_) => true,
            WorkError::Failed(_) => false,
        }
    }

    /// Check if this error came from the execution timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, WorkError::Timeout(_))
    }
}

/// Errors surfaced to callers, either at admission or through a request handle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("Circuit breaker open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    #[error("Queue full ({capacity} requests pending)")]
    QueueFull { capacity: usize },

    #[error("{0}")]
    Work(#[from] WorkError),

    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: WorkError },

    #[error("Request discarded: queue cleared")]
    QueueCleared,

    #[error("Scheduler shut down")]
    Shutdown,
}

impl SchedulerError {
    /// Check if this is an admission rejection the caller should back off from
    pub fn is_backpressure(&self) -> bool {
        matches!(self, SchedulerError::CircuitOpen { .. } | SchedulerError::QueueFull { .. })
    }

    /// Get the suggested back-off if one is known
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SchedulerError::CircuitOpen { retry_after } => Some(*retry_after),
            SchedulerError::RetryExhausted {
                last_error: WorkError::RateLimited { retry_after },
                ..
            } => *retry_after,
            _ => None,
        }
    }
}
