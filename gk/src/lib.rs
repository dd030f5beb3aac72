//! Gatekeeper - admission control for a rate-limited upstream
//!
//! Gatekeeper sits between many callers and one upstream inference service
//! that enforces a request-rate quota and a concurrency ceiling. Callers
//! submit async work with a priority; the scheduler decides when it runs.
//!
//! # Core Concepts
//!
//! - **Priority queue**: high before normal before low, FIFO within a level
//! - **Two limits**: at most `max-concurrent` in flight and at most
//!   `requests-per-minute` starts per fixed 60s window
//! - **Circuit breaker**: sustained failures stop dispatch and reject
//!   new submissions until a cooldown passes
//! - **Retries**: transient failures re-enter the queue with exponential backoff
//! - **Deduplication**: identical submissions within a short window share one result
//!
//! # Modules
//!
//! - [`scheduler`] - the scheduler and its building blocks
//! - [`domain`] - priority levels
//! - [`clock`] - injectable time source
//! - [`config`] - configuration types and loading
//! - [`simulate`] - synthetic load for trying out a configuration
//! - [`cli`] - command-line interface

pub mod cli;
pub mod clock;
pub mod config;
pub mod domain;
pub mod scheduler;
pub mod simulate;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::Config;
pub use domain::Priority;
pub use scheduler::{
    CircuitState, MetricsSnapshot, RequestHandle, Scheduler, SchedulerConfig, SchedulerError, SchedulerStatus,
    SubmitOptions, WorkError, make_dedupe_key,
};
