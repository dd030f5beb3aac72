//! Scheduler implementation

use std::any::Any;
use std::collections::BinaryHeap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use futures::FutureExt;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::breaker::CircuitBreaker;
use super::concurrency::ConcurrencyLimiter;
use super::config::{RATE_WINDOW, SchedulerConfig};
use super::dedup::Deduplicator;
use super::error::{SchedulerError, WorkError};
use super::handle::RequestHandle;
use super::metrics::{Gauges, Metrics, MetricsSnapshot, SchedulerStatus, is_healthy};
use super::queue::{ClearResult, QueueEntry, QueuedRequest, SubmitOptions, work_fn};
use super::rate::RateLimiter;
use super::retry::{RetryDecision, RetryPolicy};
use crate::clock::{Clock, TokioClock};

/// Shortest sleep the dispatcher takes when a gate asks it to wait
const MIN_GATE_DELAY: Duration = Duration::from_millis(1);

/// Internal state protected by mutex
struct SchedulerInner<T: Clone> {
    /// Priority queue of waiting requests
    queue: BinaryHeap<QueuedRequest<T>>,

    /// Currently executing attempts
    concurrency: ConcurrencyLimiter,

    /// Fixed per-minute start budget
    rate: RateLimiter,

    breaker: CircuitBreaker,

    dedup: Deduplicator<T>,

    metrics: Metrics,

    /// Admission order counter
    next_seq: u64,

    shutdown: bool,
}

impl<T> SchedulerInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn gauges(&self, now: Instant) -> Gauges {
        Gauges {
            circuit_state: self.breaker.state(),
            consecutive_failures: self.breaker.consecutive_failures(),
            requests_this_minute: self.rate.requests_this_window(now),
            active_requests: self.concurrency.active(),
            peak_active: self.concurrency.peak(),
            queue_length: self.queue.len(),
        }
    }
}

/// State shared by the public handle, the dispatcher, and execution tasks
struct SchedulerCore<T: Clone> {
    config: SchedulerConfig,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    inner: Mutex<SchedulerInner<T>>,
    notify: Notify,
}

/// What one dispatcher pass achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchStep {
    /// An item was started; try again immediately
    Dispatched,
    /// Nothing to do until a submit, completion, or retry wakes us
    Idle,
    /// A time-based gate is closed; look again after the delay
    Wait(Duration),
    Stopped,
}

/// The Scheduler admits work, orders it by priority, and dispatches it
/// within concurrency, rate, and circuit-breaker limits.
///
/// Creating a scheduler validates the configuration and spawns its
/// dispatcher task, so it must happen inside a tokio runtime. Share it between callers with `Arc<Scheduler<T>>`.
/// Dropping the scheduler stops the dispatcher; requests still queued then
/// resolve with [`SchedulerError::Shutdown`] once in-flight work drains.
pub struct Scheduler<T: Clone> {
    core: Arc<SchedulerCore<T>>,
    dispatcher: JoinHandle<()>,
}

impl<T> Scheduler<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new scheduler with the given configuration
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    /// Create a scheduler reading time from `clock`
    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        debug!(?config, "Scheduler::with_clock: called");
        config.validate()?;
        let now = clock.now();
        let retry = RetryPolicy::new(config.max_retries, config.retry_base_delay(), config.retry_max_delay());
        let inner = SchedulerInner {
            queue: BinaryHeap::new(),
            concurrency: ConcurrencyLimiter::new(config.max_concurrent),
            rate: RateLimiter::new(config.requests_per_minute, RATE_WINDOW, now),
            breaker: CircuitBreaker::new(config.circuit_breaker_threshold, config.circuit_breaker_reset()),
            dedup: Deduplicator::new(config.deduplication_window()),
            metrics: Metrics::new(),
            next_seq: 0,
            shutdown: false,
        };
        let core = Arc::new(SchedulerCore {
            config,
            retry,
            clock,
            inner: Mutex::new(inner),
            notify: Notify::new(),
        });
        let dispatcher = tokio::spawn(run_dispatcher(Arc::clone(&core)));
        Ok(Self { core, dispatcher })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.core.config
    }

    /// Admit a unit of work
    ///
    /// Fails fast with `CircuitOpen` or `QueueFull` without queueing anything.
    /// Otherwise returns a handle immediately; the work runs once the
    /// dispatcher reaches it. A fresh `dedupe_key` match returns the handle
    /// of the earlier request instead of scheduling new work.
    pub async fn submit<F, Fut>(&self, work: F, options: SubmitOptions) -> Result<RequestHandle<T>, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, WorkError>> + Send + 'static,
    {
        let SubmitOptions {
            priority,
            owner_id,
            dedupe_key,
        } = options;
        debug!(?priority, ?owner_id, ?dedupe_key, "Scheduler::submit: called");

        let mut inner = self.core.inner.lock().await;
        let now = self.core.clock.now();
        inner.metrics.record_submitted();

        if inner.shutdown {
            debug!("Scheduler::submit: shut down, rejecting");
            return Err(SchedulerError::Shutdown);
        }

        if inner.breaker.is_open(now) {
            let retry_after = inner.breaker.remaining_cooldown(now).unwrap_or_default();
            inner.metrics.record_rejected_circuit_open();
            warn!(?owner_id, ?retry_after, "Rejected submission: circuit open");
            return Err(SchedulerError::CircuitOpen { retry_after });
        }

        let capacity = self.core.config.max_queue_size;
        if inner.queue.len() >= capacity {
            inner.metrics.record_rejected_queue_full();
            warn!(?owner_id, capacity, "Rejected submission: queue full");
            return Err(SchedulerError::QueueFull { capacity });
        }

        if let Some(key) = dedupe_key.as_deref()
            && let Some(existing) = inner.dedup.lookup(key, now)
        {
            debug!(%key, id = %existing.id(), "Scheduler::submit: deduplicated");
            inner.metrics.record_dedup_hit();
            return Ok(existing);
        }

        let id = Uuid::now_v7();
        let (result, handle) = RequestHandle::channel(id);
        if let Some(key) = dedupe_key.clone() {
            inner.dedup.register(key, handle.clone(), now);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.queue.push(QueuedRequest {
            id,
            priority,
            work: work_fn(work),
            result,
            enqueued_at: now,
            seq,
            retries: 0,
            owner_id,
            dedupe_key,
        });
        let depth = inner.queue.len();
        inner.metrics.record_enqueued(depth);
        drop(inner);

        debug!(%id, ?priority, depth, "Queued");
        self.core.notify.notify_one();
        Ok(handle)
    }

    /// Get the current metrics snapshot
    pub async fn metrics(&self) -> MetricsSnapshot {
        debug!("Scheduler::metrics: called");
        let inner = self.core.inner.lock().await;
        let now = self.core.clock.now();
        MetricsSnapshot::new(&inner.metrics, inner.gauges(now))
    }

    /// Get the health summary
    pub async fn status(&self) -> SchedulerStatus {
        debug!("Scheduler::status: called");
        let inner = self.core.inner.lock().await;
        let now = self.core.clock.now();
        let circuit_state = inner.breaker.state();
        SchedulerStatus {
            healthy: is_healthy(circuit_state, inner.queue.len(), self.core.config.max_queue_size),
            active_requests: inner.concurrency.active(),
            queued_requests: inner.queue.len(),
            circuit_state,
            requests_this_minute: inner.rate.requests_this_window(now),
            average_wait_ms: inner.metrics.average_wait_ms(),
        }
    }

    /// Get queued requests in dispatch order
    pub async fn queue_details(&self) -> Vec<QueueEntry> {
        debug!("Scheduler::queue_details: called");
        let inner = self.core.inner.lock().await;
        let now = self.core.clock.now();

        let mut queued: Vec<_> = inner.queue.iter().collect();
        queued.sort_by(|a, b| b.cmp(a));
        queued
            .into_iter()
            .map(|r| QueueEntry {
                id: r.id,
                priority: r.priority,
                owner_id: r.owner_id.clone(),
                retries: r.retries,
                waiting: now.saturating_duration_since(r.enqueued_at),
            })
            .collect()
    }

    /// Reject every queued request with `QueueCleared`
    ///
    /// In-flight executions and pending retries are not affected.
    pub async fn clear_queue(&self) -> ClearResult {
        debug!("Scheduler::clear_queue: called");
        let mut inner = self.core.inner.lock().await;

        let drained: Vec<_> = inner.queue.drain().collect();
        let cleared = drained.len();
        for request in drained {
            if let Some(key) = request.dedupe_key.as_deref() {
                inner.dedup.forget(key, request.id);
            }
            request.result.settle(Err(SchedulerError::QueueCleared));
        }
        inner.metrics.record_cleared(cleared);

        info!(cleared, "Queue cleared by operator");
        ClearResult { cleared }
    }

    /// Force the breaker closed for manual recovery
    pub async fn reset_circuit_breaker(&self) {
        debug!("Scheduler::reset_circuit_breaker: called");
        self.core.inner.lock().await.breaker.reset();
        // The dispatcher may be sleeping out a cooldown
        self.core.notify.notify_one();
    }

    /// Stop dispatching and reject everything still queued with `Shutdown`
    ///
    /// In-flight attempts run to completion; their retries are not re-queued.
    pub async fn shutdown(&self) {
        debug!("Scheduler::shutdown: called");
        let mut inner = self.core.inner.lock().await;
        if inner.shutdown {
            debug!("Scheduler::shutdown: already shut down");
            return;
        }
        inner.shutdown = true;
        let drained: Vec<_> = inner.queue.drain().collect();
        let rejected = drained.len();
        for request in drained {
            request.result.settle(Err(SchedulerError::Shutdown));
        }
        drop(inner);

        info!(rejected, "Scheduler shutting down");
        self.core.notify.notify_one();
    }
}

impl<T: Clone> Drop for Scheduler<T> {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Dispatcher loop: one pass per wakeup, sleeping while gates are closed
async fn run_dispatcher<T>(core: Arc<SchedulerCore<T>>)
where
    T: Clone + Send + Sync + 'static,
{
    info!("Dispatcher started");
    loop {
        match try_dispatch(&core).await {
            DispatchStep::Dispatched => {}
            DispatchStep::Idle => core.notify.notified().await,
            DispatchStep::Wait(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay.max(MIN_GATE_DELAY)) => {}
                    _ = core.notify.notified() => {}
                }
            }
            DispatchStep::Stopped => break,
        }
    }
    info!("Dispatcher stopped");
}

/// Start the best queued item if every gate allows it
async fn try_dispatch<T>(core: &Arc<SchedulerCore<T>>) -> DispatchStep
where
    T: Clone + Send + Sync + 'static,
{
    let mut inner = core.inner.lock().await;
    if inner.shutdown {
        return DispatchStep::Stopped;
    }
    if inner.queue.is_empty() {
        return DispatchStep::Idle;
    }

    let now = core.clock.now();
    if inner.breaker.is_open(now) {
        let cooldown = inner
            .breaker
            .remaining_cooldown(now)
            .unwrap_or_else(|| core.config.circuit_breaker_reset());
        debug!(?cooldown, queued = inner.queue.len(), "try_dispatch: circuit open, waiting");
        return DispatchStep::Wait(cooldown);
    }

    if !inner.concurrency.has_capacity() {
        debug!(active = inner.concurrency.active(), "try_dispatch: at concurrency limit");
        return DispatchStep::Idle;
    }

    if !inner.rate.check_budget(now) {
        let delay = inner.rate.delay_until_next_slot(now);
        debug!(?delay, "try_dispatch: rate budget exhausted, waiting");
        return DispatchStep::Wait(delay);
    }

    let Some(request) = inner.queue.pop() else {
        return DispatchStep::Idle;
    };
    let acquired = inner.concurrency.try_acquire();
    debug_assert!(acquired, "slot checked free under the same lock");
    inner.rate.record_start();
    drop(inner);

    debug!(
        id = %request.id,
        priority = ?request.priority,
        retries = request.retries,
        "Dispatching"
    );
    tokio::spawn(execute(Arc::clone(core), request, now));
    DispatchStep::Dispatched
}

/// Run one attempt and settle, retry, or fail the request
async fn execute<T>(core: Arc<SchedulerCore<T>>, mut request: QueuedRequest<T>, dispatched_at: Instant)
where
    T: Clone + Send + Sync + 'static,
{
    let timeout = core.config.request_timeout();
    let work = Arc::clone(&request.work);
    let attempt = AssertUnwindSafe(async move { work().await }).catch_unwind();
    let outcome = match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(result)) => result,
        Ok(Err(payload)) => {
            let message = panic_message(&*payload);
            warn!(id = %request.id, %message, "Work panicked");
            Err(WorkError::failed(format!("work panicked: {}", message)))
        }
        Err(_) => Err(WorkError::Timeout(timeout)),
    };

    let now = core.clock.now();
    let mut inner = core.inner.lock().await;
    inner.concurrency.release();

    match outcome {
        Ok(value) => {
            let wait = dispatched_at.saturating_duration_since(request.enqueued_at);
            let process = now.saturating_duration_since(dispatched_at);
            inner.metrics.record_success(wait, process);
            inner.breaker.record_success();
            debug!(id = %request.id, wait_ms = wait.as_millis() as u64, process_ms = process.as_millis() as u64, "Completed");
            request.result.settle(Ok(value));
        }
        Err(error) => {
            if error.is_timeout() {
                inner.metrics.record_timeout();
            }
            match core.retry.decide(error, request.retries) {
                RetryDecision::Retry { delay } => {
                    inner.metrics.record_retry();
                    request.retries += 1;
                    debug!(id = %request.id, retries = request.retries, ?delay, "Scheduling retry");
                    tokio::spawn(requeue_after(Arc::clone(&core), request, delay));
                }
                RetryDecision::Fail(err) => {
                    let exhausted = matches!(err, SchedulerError::RetryExhausted { .. });
                    inner.metrics.record_failure(exhausted);
                    inner.breaker.record_failure(now);
                    warn!(id = %request.id, owner_id = ?request.owner_id, error = %err, "Request failed");
                    request.result.settle(Err(err));
                }
            }
        }
    }
    drop(inner);

    core.notify.notify_one();
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Put a retried request back in the queue once its backoff has passed
async fn requeue_after<T>(core: Arc<SchedulerCore<T>>, request: QueuedRequest<T>, delay: Duration)
where
    T: Clone + Send + Sync + 'static,
{
    tokio::time::sleep(delay).await;

    let mut inner = core.inner.lock().await;
    if inner.shutdown {
        debug!(id = %request.id, "requeue_after: scheduler shut down, dropping retry");
        request.result.settle(Err(SchedulerError::Shutdown));
        return;
    }
    debug!(id = %request.id, retries = request.retries, "Re-queued for retry");
    inner.queue.push(request);
    let depth = inner.queue.len();
    inner.metrics.observe_queue_depth(depth);
    drop(inner);

    core.notify.notify_one();
}
