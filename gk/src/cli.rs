//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::simulate::SimulationConfig;

/// Gatekeeper - admission control for a rate-limited upstream
#[derive(Parser)]
#[command(
    name = "gk",
    about = "Priority scheduling, rate limiting and circuit breaking for upstream calls",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the effective configuration as YAML
    Config,

    /// Run a burst of synthetic requests through the scheduler
    Simulate {
        #[command(flatten)]
        load: SimulateArgs,

        /// Override max-concurrent
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Override requests-per-minute
        #[arg(long)]
        requests_per_minute: Option<u32>,

        /// Override max-queue-size
        #[arg(long)]
        max_queue_size: Option<usize>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the dedupe key for an owner, action and content
    DedupeKey {
        /// Caller identity
        owner: String,

        /// Action name
        action: String,

        /// Request content
        content: String,
    },
}

/// Shape of the synthetic load
#[derive(Debug, Clone, clap::Args)]
pub struct SimulateArgs {
    /// Requests to submit
    #[arg(short = 'n', long, default_value_t = 200)]
    pub requests: usize,

    /// Base upstream latency in milliseconds
    #[arg(long, default_value_t = 200)]
    pub latency_ms: u64,

    /// Extra random latency in milliseconds
    #[arg(long, default_value_t = 100)]
    pub jitter_ms: u64,

    /// Probability an attempt fails (0.0 - 1.0)
    #[arg(long, default_value_t = 0.05)]
    pub failure_rate: f64,

    /// Share of failures that are retryable (0.0 - 1.0)
    #[arg(long, default_value_t = 0.8)]
    pub transient_ratio: f64,

    /// Probability a request repeats the previous one (0.0 - 1.0)
    #[arg(long, default_value_t = 0.05)]
    pub duplicate_rate: f64,

    /// Distinct owners to spread requests over
    #[arg(long, default_value_t = 8)]
    pub owners: usize,
}

impl From<SimulateArgs> for SimulationConfig {
    fn from(args: SimulateArgs) -> Self {
        Self {
            requests: args.requests,
            latency_ms: args.latency_ms,
            jitter_ms: args.jitter_ms,
            failure_rate: args.failure_rate,
            transient_ratio: args.transient_ratio,
            duplicate_rate: args.duplicate_rate,
            owners: args.owners,
        }
    }
}

/// Output format for reports
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text or json", s))
            }
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
