//! Gatekeeper - admission control for a rate-limited upstream
//!
//! CLI entry point for inspecting configuration and simulating load.

use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info};

use gatekeeper::cli::{Cli, Command, OutputFormat};
use gatekeeper::config::Config;
use gatekeeper::make_dedupe_key;
use gatekeeper::scheduler::{CircuitState, Scheduler, SchedulerConfig};
use gatekeeper::simulate::{SimulationConfig, SimulationReport, run_simulation};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    // stdout carries command output; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to install subscriber: {}", e))?;

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Config => cmd_config(&config),
        Command::Simulate {
            load,
            max_concurrent,
            requests_per_minute,
            max_queue_size,
            format,
        } => {
            let mut scheduler_config = config.scheduler.clone();
            if let Some(n) = max_concurrent {
                scheduler_config.max_concurrent = n;
            }
            if let Some(n) = requests_per_minute {
                scheduler_config.requests_per_minute = n;
            }
            if let Some(n) = max_queue_size {
                scheduler_config.max_queue_size = n;
            }
            cmd_simulate(scheduler_config, load.into(), format).await
        }
        Command::DedupeKey { owner, action, content } => {
            println!("{}", make_dedupe_key(&owner, &action, &content));
            Ok(())
        }
    }
}

fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    config.validate()?;
    print!("{}", config.to_yaml()?);
    Ok(())
}

async fn cmd_simulate(scheduler_config: SchedulerConfig, sim: SimulationConfig, format: OutputFormat) -> Result<()> {
    debug!(?scheduler_config, ?sim, %format, "cmd_simulate: called");
    let scheduler = Arc::new(Scheduler::new(scheduler_config).context("Invalid scheduler configuration")?);
    let report = run_simulation(Arc::clone(&scheduler), &sim).await;
    scheduler.shutdown().await;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report).context("Failed to serialize report")?);
        }
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &SimulationReport) {
    let metrics = &report.metrics;

    println!("{}", "Simulation Report".bold());
    println!("  Elapsed:        {} ms", report.elapsed_ms);
    println!("  Submitted:      {}", report.submitted);
    println!("  Succeeded:      {}", report.succeeded.to_string().green());
    let failed = if report.failed > 0 {
        report.failed.to_string().red()
    } else {
        report.failed.to_string().normal()
    };
    println!("  Failed:         {} ({} retry exhausted)", failed, report.retry_exhausted);
    let rejected = if report.rejected > 0 {
        report.rejected.to_string().yellow()
    } else {
        report.rejected.to_string().normal()
    };
    println!("  Rejected:       {}", rejected);

    println!();
    println!("{}", "Scheduler".bold());
    let circuit = match metrics.circuit_state {
        CircuitState::Closed => metrics.circuit_state.to_string().green(),
        CircuitState::HalfOpen => metrics.circuit_state.to_string().yellow(),
        CircuitState::Open => metrics.circuit_state.to_string().red(),
    };
    println!("  Circuit:        {}", circuit);
    println!("  Retries:        {}", metrics.retried_requests);
    println!("  Timeouts:       {}", metrics.timed_out_attempts);
    println!("  Deduplicated:   {}", metrics.deduplicated_requests);
    println!("  Peak active:    {}", metrics.peak_active);
    println!("  Peak queue:     {}", metrics.peak_queue_depth);
    println!("  Avg wait:       {:.1} ms", metrics.average_wait_ms);
    println!("  Avg process:    {:.1} ms", metrics.average_process_ms);
}
