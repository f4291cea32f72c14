//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// Orchestrator - admission-controlled instance dispatcher
#[derive(Parser, Debug)]
#[command(name = "od", version, about = "Admission-controlled dispatcher for compute instances")]
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
    /// Push a batch of synthetic tasks through the dispatcher
    Simulate {
        /// Number of concurrent tasks
        #[arg(short, long, default_value = "10")]
        tasks: usize,

        /// Milliseconds each task occupies its instance
        #[arg(short, long, default_value = "100")]
        work_ms: u64,

        /// Extra instance address (repeatable, added after configured ones)
        #[arg(short, long = "instance")]
        instances: Vec<String>,

        /// Quarantine this address before starting (repeatable)
        #[arg(short, long)]
        block: Vec<String>,

        /// Seconds to wait for queued tasks before reporting them pending
        #[arg(short, long, default_value = "30")]
        deadline_secs: u64,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List instances in round-robin order
    Instances {
        /// Extra instance address (repeatable, added after configured ones)
        #[arg(short, long = "instance")]
        instances: Vec<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the effective configuration
    Config,
}

/// Output format for simulate/instances commands
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

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("orchestrator")
        .join("logs")
        .join("orchestrator.log")
}
