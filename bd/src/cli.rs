//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// batchd - batch job scheduler with per-application admission control
#[derive(Parser)]
#[command(
    name = "bd",
    about = "Batch job scheduler with per-application admission control and statistics rollup",
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
    /// Run jobs through the scheduler with a simulated worker executor
    Simulate {
        /// Number of batch jobs to submit
        #[arg(short, long, default_value = "4")]
        jobs: usize,

        /// Requests per job
        #[arg(short, long, default_value = "250")]
        requests: u64,

        /// Chance each request fails (0.0 - 1.0)
        #[arg(long, default_value = "0.0")]
        failure_rate: f64,

        /// Maximum simulated latency per request in milliseconds
        #[arg(long, default_value = "5")]
        latency_ms: u64,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show persisted statistics
    Stats {
        /// Business application to filter by
        #[arg(short, long)]
        application: Option<String>,

        /// Duration type to filter by (hour, day, month, year)
        #[arg(short, long)]
        duration: Option<statstore::DurationType>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run one collation pass against the statistics store
    Collate {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format for stats and summaries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
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
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

/// Path of the log file
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("batchd")
        .join("logs")
        .join("batchd.log")
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_output_format() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("plain".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_parse_stats() {
        let cli = Cli::try_parse_from(["bd", "stats", "--duration", "day", "--format", "json"]).unwrap();
        match cli.command {
            Command::Stats { duration, format, .. } => {
                assert_eq!(duration, Some(statstore::DurationType::Day));
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
