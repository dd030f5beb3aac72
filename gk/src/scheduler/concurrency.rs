//! Cap on simultaneously executing requests

use tracing::debug;

/// Counting gate for in-flight executions
///
/// Lives inside the scheduler state mutex; acquire happens at dispatch and
/// release when the attempt finishes, whatever its outcome.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    max: usize,
    active: usize,
    peak: usize,
}

impl ConcurrencyLimiter {
    pub fn new(max: usize) -> Self {
        debug!(max, "ConcurrencyLimiter::new: called");
        Self { max, active: 0, peak: 0 }
    }

    pub fn has_capacity(&self) -> bool {
        self.active < self.max
    }

    /// Take a slot if one is free
    pub fn try_acquire(&mut self) -> bool {
        if !self.has_capacity() {
            return false;
        }
        self.active += 1;
        self.peak = self.peak.max(self.active);
        true
    }

    pub fn release(&mut self) {
        debug_assert!(self.active > 0, "release without matching acquire");
        self.active = self.active.saturating_sub(1);
    }

    pub fn active(&self) -> usize {
        self.active
    }

    /// Highest number of simultaneous executions observed
    pub fn peak(&self) -> usize {
        self.peak
    }
}
