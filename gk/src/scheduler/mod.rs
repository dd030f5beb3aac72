//! Admission control and dispatch in front of a rate-limited upstream
//!
//! Requests are admitted (or rejected for backpressure), ordered by
//! priority then age, and dispatched by a single loop that respects the
//! concurrency cap, the per-minute rate budget, and the circuit breaker.
//! Transient failures are re-queued with exponential backoff.

mod breaker;
mod concurrency;
mod config;
mod core;
mod dedup;
mod error;
mod handle;
mod metrics;
mod queue;
mod rate;
mod retry;

pub use breaker::{CircuitBreaker, CircuitState};
pub use concurrency::ConcurrencyLimiter;
pub use config::{RATE_WINDOW, SchedulerConfig};
pub use self::core::Scheduler;
pub use dedup::{Deduplicator, make_dedupe_key};
pub use error::{SchedulerError, WorkError};
pub use handle::{Outcome, RequestHandle};
pub use metrics::{MetricsSnapshot, SchedulerStatus, is_healthy};
pub use queue::{ClearResult, QueueEntry, SubmitOptions, WorkFn, WorkFuture, work_fn};
pub use rate::RateLimiter;
pub use retry::{RetryDecision, RetryPolicy};
