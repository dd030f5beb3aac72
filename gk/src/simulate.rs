//! Synthetic load against a fake upstream
//!
//! Drives a [`Scheduler`] with a burst of requests whose latency and failure
//! mode are drawn at random, then reports how each request ended. Used by
//! `gk simulate` to see how a configuration behaves under load.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::Priority;
use crate::scheduler::{MetricsSnapshot, Scheduler, SchedulerError, SubmitOptions, WorkError, make_dedupe_key};

/// Shape of the synthetic load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Requests to submit in one burst
    pub requests: usize,
    /// Base upstream latency
    pub latency_ms: u64,
    /// Extra random latency, uniform in `0..=jitter_ms`
    pub jitter_ms: u64,
    /// Probability an attempt fails
    pub failure_rate: f64,
    /// Share of failures that are transient (retryable)
    pub transient_ratio: f64,
    /// Probability a request repeats the previous request's content
    pub duplicate_rate: f64,
    /// Distinct owners the requests are spread over
    pub owners: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            requests: 200,
            latency_ms: 200,
            jitter_ms: 100,
            failure_rate: 0.05,
            transient_ratio: 0.8,
            duplicate_rate: 0.05,
            owners: 8,
        }
    }
}

/// How a simulated burst ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub elapsed_ms: u64,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub retry_exhausted: usize,
    pub rejected: usize,
    pub metrics: MetricsSnapshot,
}

/// Fake upstream: sleeps, then succeeds or fails at the configured rates
#[derive(Debug, Clone)]
struct SyntheticUpstream {
    latency: Duration,
    jitter_ms: u64,
    failure_rate: f64,
    transient_ratio: f64,
}

impl SyntheticUpstream {
    fn new(sim: &SimulationConfig) -> Self {
        Self {
            latency: Duration::from_millis(sim.latency_ms),
            jitter_ms: sim.jitter_ms,
            failure_rate: sim.failure_rate.clamp(0.0, 1.0),
            transient_ratio: sim.transient_ratio.clamp(0.0, 1.0),
        }
    }

    /// Decide latency and outcome for one attempt
    fn plan(&self, content: &str) -> (Duration, Result<String, WorkError>) {
        let mut rng = rand::rng();
        let jitter = if self.jitter_ms > 0 {
            rng.random_range(0..=self.jitter_ms)
        } else {
            0
        };
        let latency = self.latency + Duration::from_millis(jitter);

        if rng.random::<f64>() >= self.failure_rate {
            return (latency, Ok(format!("completion for {}", content)));
        }
        let error = if rng.random::<f64>() < self.transient_ratio {
            match rng.random_range(0..3) {
                0 => WorkError::RateLimited { retry_after: None },
                1 => WorkError::Status {
                    status: 503,
                    message: "upstream unavailable".to_string(),
                },
                _ => WorkError::Server("upstream overloaded".to_string()),
            }
        } else {
            WorkError::Status {
                status: 400,
                message: "rejected by upstream".to_string(),
            }
        };
        (latency, Err(error))
    }
}

/// Submit a burst and wait for every admitted request to settle
pub async fn run_simulation(scheduler: Arc<Scheduler<String>>, sim: &SimulationConfig) -> SimulationReport {
    debug!(?sim, "run_simulation: called");
    let upstream = Arc::new(SyntheticUpstream::new(sim));
    let owners = sim.owners.max(1);
    let started = Instant::now();

    let mut handles = Vec::with_capacity(sim.requests);
    let mut rejected = 0;
    let mut previous: Option<(String, String)> = None;

    for i in 0..sim.requests {
        let (owner, content) = {
            let mut rng = rand::rng();
            match &previous {
                Some(prev) if rng.random::<f64>() < sim.duplicate_rate => prev.clone(),
                _ => (format!("owner-{}", i % owners), format!("prompt #{}", i)),
            }
        };
        let priority = match i % 10 {
            0 => Priority::High,
            1..=6 => Priority::Normal,
            _ => Priority::Low,
        };
        let options = SubmitOptions::new(priority)
            .owner(owner.clone())
            .dedupe_key(make_dedupe_key(&owner, "complete", &content));

        let upstream = upstream.clone();
        let prompt = content.clone();
        let work = move || {
            let (latency, result) = upstream.plan(&prompt);
            async move {
                tokio::time::sleep(latency).await;
                result
            }
        };

        match scheduler.submit(work, options).await {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                debug!(%err, "run_simulation: submission rejected");
                rejected += 1;
            }
        }
        previous = Some((owner, content));
    }

    let submitted = handles.len();
    info!(submitted, rejected, "Simulation burst submitted, waiting for results");

    let mut succeeded = 0;
    let mut failed = 0;
    let mut retry_exhausted = 0;
    for outcome in join_all(handles).await {
        match outcome {
            Ok(_) => succeeded += 1,
            Err(SchedulerError::RetryExhausted { .. }) => {
                failed += 1;
                retry_exhausted += 1;
            }
            Err(_) => failed += 1,
        }
    }

    let report = SimulationReport {
        elapsed_ms: started.elapsed().as_millis() as u64,
        submitted,
        succeeded,
        failed,
        retry_exhausted,
        rejected,
        metrics: scheduler.metrics().await,
    };
    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        elapsed_ms = report.elapsed_ms,
        "Simulation finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerConfig;

    #[test]
    fn test_plan_without_failures_always_succeeds() {
        let upstream = SyntheticUpstream::new(&SimulationConfig {
            failure_rate: 0.0,
            jitter_ms: 0,
            latency_ms: 5,
            ..Default::default()
        });
        for _ in 0..50 {
            let (latency, result) = upstream.plan("x");
            assert_eq!(latency, Duration::from_millis(5));
            assert!(result.is_ok());
        }
    }

    #[test]
    fn test_plan_permanent_failures() {
        let upstream = SyntheticUpstream::new(&SimulationConfig {
            failure_rate: 1.0,
            transient_ratio: 0.0,
            ..Default::default()
        });
        for _ in 0..20 {
            let (_, result) = upstream.plan("x");
            assert!(!result.unwrap_err().is_retryable());
        }
    }

    #[test]
    fn test_plan_jitter_bounds() {
        let upstream = SyntheticUpstream::new(&SimulationConfig {
            latency_ms: 10,
            jitter_ms: 5,
            failure_rate: 0.0,
            ..Default::default()
        });
        for _ in 0..50 {
            let (latency, _) = upstream.plan("x");
            assert!(latency >= Duration::from_millis(10));
            assert!(latency <= Duration::from_millis(15));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_all_succeed() {
        let config = SchedulerConfig {
            max_concurrent: 4,
            ..Default::default()
        };
        let scheduler = Arc::new(Scheduler::new(config).unwrap());
        let sim = SimulationConfig {
            requests: 20,
            failure_rate: 0.0,
            duplicate_rate: 0.0,
            ..Default::default()
        };

        let report = run_simulation(scheduler, &sim).await;
        assert_eq!(report.submitted, 20);
        assert_eq!(report.succeeded, 20);
        assert_eq!(report.failed, 0);
        assert_eq!(report.rejected, 0);
        assert_eq!(report.metrics.successful_requests, 20);
        assert!(report.metrics.peak_active <= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_counts_rejections() {
        let config = SchedulerConfig {
            max_concurrent: 1,
            max_queue_size: 5,
            ..Default::default()
        };
        let scheduler = Arc::new(Scheduler::new(config).unwrap());
        let sim = SimulationConfig {
            requests: 10,
            failure_rate: 0.0,
            duplicate_rate: 0.0,
            ..Default::default()
        };

        let report = run_simulation(scheduler, &sim).await;
        assert_eq!(report.submitted + report.rejected, 10);
        assert!(report.rejected >= 4);
        assert_eq!(report.succeeded, report.submitted);
    }
}
