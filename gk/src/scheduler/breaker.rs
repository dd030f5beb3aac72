//! Circuit breaker guarding the upstream
//!
//! ```text
//! Closed   -> Open:     consecutive failures >= threshold
//! Open     -> HalfOpen: cooldown elapsed (checked lazily on the next gate check)
//! HalfOpen -> Closed:   next success
//! HalfOpen -> Open:     next failure (cooldown restarts)
//! ```
//!
//! Half-open trial requests are not serialized: every dispatch attempted before the
//! first trial request reports back is let through.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Externally visible breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open { opened_at: Instant },
    HalfOpen,
}

/// Three-state failure gate
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        debug!(threshold, cooldown_ms = cooldown.as_millis() as u64, "CircuitBreaker::new: called");
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            threshold,
            cooldown,
        }
    }

    /// Check whether the breaker blocks traffic
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open here and
    /// lets the caller through as a trial request.
    pub fn is_open(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => false,
            BreakerState::Open { opened_at } => {
                if now.saturating_duration_since(opened_at) >= self.cooldown {
                    info!("Circuit breaker cooldown elapsed, half-open");
                    self.state = BreakerState::HalfOpen;
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Report the outcome of a terminal execution
    pub fn record_outcome(&mut self, success: bool, now: Instant) {
        if success {
            self.record_success();
        } else {
            self.record_failure(now);
        }
    }

    pub fn record_success(&mut self) {
        debug!(state = %self.state(), "CircuitBreaker::record_success: called");
        self.consecutive_failures = 0;
        if self.state == BreakerState::HalfOpen {
            info!("Circuit breaker trial request succeeded, closed");
            self.state = BreakerState::Closed;
        }
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        debug!(
            state = %self.state(),
            consecutive_failures = self.consecutive_failures,
            "CircuitBreaker::record_failure: called"
        );
        match self.state {
            BreakerState::HalfOpen => {
                warn!("Circuit breaker trial request failed, reopening");
                self.state = BreakerState::Open { opened_at: now };
            }
            BreakerState::Closed if self.consecutive_failures >= self.threshold => {
                warn!(
                    consecutive_failures = self.consecutive_failures,
                    cooldown_ms = self.cooldown.as_millis() as u64,
                    "Circuit breaker opened"
                );
                self.state = BreakerState::Open { opened_at: now };
            }
            BreakerState::Open { .. } => {
                // Late failures from work dispatched before opening restart the cooldown
                self.state = BreakerState::Open { opened_at: now };
            }
            BreakerState::Closed => {}
        }
    }

    /// Time left before the breaker will allow a trial request, if open
    pub fn remaining_cooldown(&self, now: Instant) -> Option<Duration> {
        match self.state {
            BreakerState::Open { opened_at } => {
                Some(self.cooldown.saturating_sub(now.saturating_duration_since(opened_at)))
            }
            _ => None,
        }
    }

    /// Force the breaker closed and forget past failures
    pub fn reset(&mut self) {
        info!(state = %self.state(), "Circuit breaker manually reset");
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
    }

    /// Stored state, without applying a pending cooldown transition
    pub fn state(&self) -> CircuitState {
        match self.state {
            BreakerState::Closed => CircuitState::Closed,
            BreakerState::Open { .. } => CircuitState::Open,
            BreakerState::HalfOpen => CircuitState::HalfOpen,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(45);

    fn tripped(now: Instant) -> CircuitBreaker {
        let mut breaker = CircuitBreaker::new(3, COOLDOWN);
        for _ in 0..3 {
            breaker.record_failure(now);
        }
        breaker
    }

    #[test]
    fn test_opens_at_threshold() {
        let now = Instant::now();
        let mut breaker = CircuitBreaker::new(3, COOLDOWN);

        breaker.record_failure(now);
        breaker.record_failure(now);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(!breaker.is_open(now));

        breaker.record_failure(now);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.is_open(now));
        assert_eq!(breaker.remaining_cooldown(now), Some(COOLDOWN));
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let now = Instant::now();
        let mut breaker = CircuitBreaker::new(3, COOLDOWN);

        breaker.record_failure(now);
        breaker.record_failure(now);
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);

        breaker.record_failure(now);
        breaker.record_failure(now);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let start = Instant::now();
        let mut breaker = tripped(start);

        assert!(breaker.is_open(start + Duration::from_secs(44)));
        assert_eq!(breaker.state(), CircuitState::Open);

        assert!(!breaker.is_open(start + COOLDOWN));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.remaining_cooldown(start + COOLDOWN), None);
    }

    #[test]
    fn test_half_open_success_closes() {
        let start = Instant::now();
        let mut breaker = tripped(start);
        assert!(!breaker.is_open(start + COOLDOWN));

        breaker.record_outcome(true, start + COOLDOWN);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn test_half_open_failure_reopens_and_restarts_cooldown() {
        let start = Instant::now();
        let mut breaker = tripped(start);
        let trial_at = start + COOLDOWN;
        assert!(!breaker.is_open(trial_at));

        breaker.record_outcome(false, trial_at);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.is_open(trial_at + Duration::from_secs(30)));
        assert!(!breaker.is_open(trial_at + COOLDOWN));
    }

    #[test]
    fn test_half_open_admits_multiple_trials() {
        let start = Instant::now();
        let mut breaker = tripped(start);
        let t = start + COOLDOWN;
        assert!(!breaker.is_open(t));
        assert!(!breaker.is_open(t));
        assert!(!breaker.is_open(t));
    }

    #[test]
    fn test_reset() {
        let now = Instant::now();
        let mut breaker = tripped(now);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(!breaker.is_open(now));
    }

    #[test]
    fn test_state_display_and_serde() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
        assert_eq!(serde_json::to_string(&CircuitState::HalfOpen).unwrap(), "\"half-open\"");
        assert_eq!(serde_json::to_string(&CircuitState::Closed).unwrap(), "\"closed\"");
    }
}
