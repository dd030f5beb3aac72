//! Scheduler metrics
//!
//! Monotonic counters plus two bounded ring buffers (wait and process times)
//! feeding rolling averages. Everything here is mutated under the scheduler
//! state mutex; snapshots are plain values.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::breaker::CircuitState;

/// Samples kept per timing buffer
pub const TIMING_SAMPLES: usize = 100;

/// Fixed-capacity ring of millisecond samples
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample.as_millis() as u64);
    }

    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().sum::<u64>() as f64 / self.samples.len() as f64
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Counters and timing buffers
#[derive(Debug, Clone)]
pub struct Metrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retried_requests: u64,
    pub queued_requests: u64,
    pub retry_exhausted: u64,
    pub deduplicated_requests: u64,
    pub rejected_circuit_open: u64,
    pub rejected_queue_full: u64,
    pub cleared_requests: u64,
    pub timed_out_attempts: u64,
    pub peak_queue_depth: usize,
    wait_times: RollingWindow,
    process_times: RollingWindow,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            retried_requests: 0,
            queued_requests: 0,
            retry_exhausted: 0,
            deduplicated_requests: 0,
            rejected_circuit_open: 0,
            rejected_queue_full: 0,
            cleared_requests: 0,
            timed_out_attempts: 0,
            peak_queue_depth: 0,
            wait_times: RollingWindow::new(TIMING_SAMPLES),
            process_times: RollingWindow::new(TIMING_SAMPLES),
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        debug!("Metrics::new: called");
        Self::default()
    }

    /// Every call to submit, whatever its outcome
    pub fn record_submitted(&mut self) {
        self.total_requests += 1;
    }

    /// A new request entered the queue
    pub fn record_enqueued(&mut self, queue_depth: usize) {
        self.queued_requests += 1;
        self.observe_queue_depth(queue_depth);
    }

    pub fn observe_queue_depth(&mut self, queue_depth: usize) {
        self.peak_queue_depth = self.peak_queue_depth.max(queue_depth);
    }

    pub fn record_success(&mut self, wait: Duration, process: Duration) {
        self.successful_requests += 1;
        self.wait_times.push(wait);
        self.process_times.push(process);
    }

    pub fn record_retry(&mut self) {
        self.retried_requests += 1;
    }

    /// Terminal failure; `exhausted` marks a transient error out of retries
    pub fn record_failure(&mut self, exhausted: bool) {
        self.failed_requests += 1;
        if exhausted {
            self.retry_exhausted += 1;
        }
    }

    pub fn record_timeout(&mut self) {
        self.timed_out_attempts += 1;
    }

    pub fn record_dedup_hit(&mut self) {
        self.deduplicated_requests += 1;
    }

    pub fn record_rejected_circuit_open(&mut self) {
        self.rejected_circuit_open += 1;
    }

    pub fn record_rejected_queue_full(&mut self) {
        self.rejected_queue_full += 1;
    }

    pub fn record_cleared(&mut self, count: usize) {
        self.cleared_requests += count as u64;
    }

    pub fn average_wait_ms(&self) -> f64 {
        self.wait_times.average()
    }

    pub fn average_process_ms(&self) -> f64 {
        self.process_times.average()
    }
}

/// Live gauges read alongside the counters
#[derive(Debug, Clone, Copy)]
pub struct Gauges {
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub requests_this_minute: u32,
    pub active_requests: usize,
    pub peak_active: usize,
    pub queue_length: usize,
}

/// Point-in-time view of the scheduler's metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retried_requests: u64,
    pub queued_requests: u64,
    pub retry_exhausted: u64,
    pub deduplicated_requests: u64,
    pub rejected_circuit_open: u64,
    pub rejected_queue_full: u64,
    pub cleared_requests: u64,
    pub timed_out_attempts: u64,
    pub average_wait_ms: f64,
    pub average_process_ms: f64,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub requests_this_minute: u32,
    pub active_requests: usize,
    pub peak_active: usize,
    pub queue_length: usize,
    pub peak_queue_depth: usize,
}

impl MetricsSnapshot {
    pub fn new(metrics: &Metrics, gauges: Gauges) -> Self {
        Self {
            total_requests: metrics.total_requests,
            successful_requests: metrics.successful_requests,
            failed_requests: metrics.failed_requests,
            retried_requests: metrics.retried_requests,
            queued_requests: metrics.queued_requests,
            retry_exhausted: metrics.retry_exhausted,
            deduplicated_requests: metrics.deduplicated_requests,
            rejected_circuit_open: metrics.rejected_circuit_open,
            rejected_queue_full: metrics.rejected_queue_full,
            cleared_requests: metrics.cleared_requests,
            timed_out_attempts: metrics.timed_out_attempts,
            average_wait_ms: metrics.average_wait_ms(),
            average_process_ms: metrics.average_process_ms(),
            circuit_state: gauges.circuit_state,
            consecutive_failures: gauges.consecutive_failures,
            requests_this_minute: gauges.requests_this_minute,
            active_requests: gauges.active_requests,
            peak_active: gauges.peak_active,
            queue_length: gauges.queue_length,
            peak_queue_depth: metrics.peak_queue_depth,
        }
    }
}

/// Health summary for load balancers and dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub healthy: bool,
    pub active_requests: usize,
    pub queued_requests: usize,
    pub circuit_state: CircuitState,
    pub requests_this_minute: u32,
    pub average_wait_ms: f64,
}

/// Healthy when the breaker is closed and the queue is below 80% of capacity
pub fn is_healthy(circuit_state: CircuitState, queue_length: usize, max_queue_size: usize) -> bool {
    circuit_state == CircuitState::Closed && queue_length * 10 < max_queue_size * 8
}
