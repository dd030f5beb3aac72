//! Scheduler configuration

use eyre::{Result, eyre};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Length of the fixed rate-limit window
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Max simultaneously executing requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Max executions started per fixed one-minute window
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Per-attempt execution timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Max requests waiting in the queue
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Max retries after the initial attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay in milliseconds, doubled per retry
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Cap on the retry delay in milliseconds
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Consecutive terminal failures that open the breaker
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    /// Breaker cooldown before a half-open trial request, in milliseconds
    #[serde(default = "default_circuit_breaker_reset_ms")]
    pub circuit_breaker_reset_ms: u64,

    /// Window in which identical dedupe keys share one execution, in milliseconds
    #[serde(default = "default_deduplication_window_ms")]
    pub deduplication_window_ms: u64,
}

fn default_max_concurrent() -> usize {
    120
}

fn default_requests_per_minute() -> u32 {
    450
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

fn default_max_queue_size() -> usize {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_circuit_breaker_threshold() -> u32 {
    15
}

fn default_circuit_breaker_reset_ms() -> u64 {
    45_000
}

fn default_deduplication_window_ms() -> u64 {
    2_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            requests_per_minute: default_requests_per_minute(),
            request_timeout_ms: default_request_timeout_ms(),
            max_queue_size: default_max_queue_size(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_breaker_reset_ms: default_circuit_breaker_reset_ms(),
            deduplication_window_ms: default_deduplication_window_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Reject settings the scheduler cannot make progress with
    pub fn validate(&self) -> Result<()> {
        debug!(?self, "SchedulerConfig::validate: called");
        if self.max_concurrent == 0 {
            return Err(eyre!("max-concurrent must be at least 1"));
        }
        if self.requests_per_minute == 0 {
            return Err(eyre!("requests-per-minute must be at least 1"));
        }
        if self.max_queue_size == 0 {
            return Err(eyre!("max-queue-size must be at least 1"));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(eyre!("circuit-breaker-threshold must be at least 1"));
        }
        if self.request_timeout_ms == 0 {
            return Err(eyre!("request-timeout-ms must be greater than 0"));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(eyre!(
                "retry-max-delay-ms ({}) is below retry-base-delay-ms ({})",
                self.retry_max_delay_ms,
                self.retry_base_delay_ms
            ));
        }
        Ok(())
    }

    /// Get the execution timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Get the first retry delay as a Duration
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Get the retry delay cap as a Duration
    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    /// Get the breaker cooldown as a Duration
    pub fn circuit_breaker_reset(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_reset_ms)
    }

    /// Get the dedup window as a Duration
    pub fn deduplication_window(&self) -> Duration {
        Duration::from_millis(self.deduplication_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_concurrent, 120);
        assert_eq!(config.requests_per_minute, 450);
        assert_eq!(config.request_timeout_ms, 60_000);
        assert_eq!(config.max_queue_size, 10_000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_base_delay_ms, 1_000);
        assert_eq!(config.retry_max_delay_ms, 30_000);
        assert_eq!(config.circuit_breaker_threshold, 15);
        assert_eq!(config.circuit_breaker_reset_ms, 45_000);
        assert_eq!(config.deduplication_window_ms, 2_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_durations() {
        let config = SchedulerConfig {
            request_timeout_ms: 1_500,
            deduplication_window_ms: 250,
            ..Default::default()
        };
        assert_eq!(config.request_timeout(), Duration::from_millis(1_500));
        assert_eq!(config.deduplication_window(), Duration::from_millis(250));
        assert_eq!(config.circuit_breaker_reset(), Duration::from_secs(45));
        assert_eq!(config.retry_base_delay(), Duration::from_secs(1));
        assert_eq!(config.retry_max_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "max-concurrent: 4\nrequests-per-minute: 20\n";
        let config: SchedulerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.requests_per_minute, 20);
        assert_eq!(config.max_queue_size, 10_000);
        assert_eq!(config.circuit_breaker_threshold, 15);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = SchedulerConfig {
            max_concurrent: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SchedulerConfig {
            requests_per_minute: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SchedulerConfig {
            max_queue_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_retry_delays() {
        let config = SchedulerConfig {
            retry_base_delay_ms: 5_000,
            retry_max_delay_ms: 1_000,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retry-max-delay-ms"));
    }
}
