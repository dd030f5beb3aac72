//! Fixed-window rate limiter
//!
//! The window restarts the first time a budget check happens at least one
//! window length after it began. Two full budgets can therefore start within
//! a short span straddling a window boundary.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Per-window start budget
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    window_start: Instant,
    count: u32,
}

impl RateLimiter {
    /// Create a limiter whose first window starts at `now`
    pub fn new(limit: u32, window: Duration, now: Instant) -> Self {
        debug!(limit, window_ms = window.as_millis() as u64, "RateLimiter::new: called");
        Self {
            limit,
            window,
            window_start: now,
            count: 0,
        }
    }

    fn window_elapsed(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= self.window
    }

    /// Reset the window if it has lapsed, then report whether a start is allowed
    pub fn check_budget(&mut self, now: Instant) -> bool {
        if self.window_elapsed(now) {
            debug!(previous_count = self.count, "RateLimiter::check_budget: window lapsed, resetting");
            self.window_start = now;
            self.count = 0;
        }
        self.count < self.limit
    }

    /// Count one execution start against the current window
    pub fn record_start(&mut self) {
        self.count += 1;
    }

    /// Time to wait before the next start should be attempted
    ///
    /// With budget left the remaining window is spread evenly over it;
    /// with none left the rest of the window must pass.
    pub fn delay_until_next_slot(&self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.window_start);
        let remaining_window = self.window.saturating_sub(elapsed);
        let remaining_budget = self.limit.saturating_sub(self.count);
        if remaining_budget > 0 {
            remaining_window / remaining_budget
        } else {
            remaining_window
        }
    }

    /// Starts counted in the current window, without resetting it
    pub fn requests_this_window(&self, now: Instant) -> u32 {
        if self.window_elapsed(now) { 0 } else { self.count }
    }
}
