//! Orchestrator - admission-controlled instance dispatcher
//!
//! CLI entry point for exercising the dispatcher against configured instances.

use std::fs;
use std::time::Duration;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info};

use orchestrator::cli::{Cli, Command, OutputFormat, get_log_path};
use orchestrator::config::Config;
use orchestrator::dispatcher::Dispatcher;
use orchestrator::instance::{InstanceSnapshot, InstanceState};
use orchestrator::simulate::{self, SimulationPlan, SimulationReport, TaskOutcome};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level).map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
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

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

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
    info!(instances = config.instances.len(), "orchestrator loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Simulate {
            tasks,
            work_ms,
            instances,
            block,
            deadline_secs,
            format,
        } => {
            let plan = SimulationPlan {
                tasks,
                work: Duration::from_millis(work_ms),
                block,
                deadline: Duration::from_secs(deadline_secs),
            };
            cmd_simulate(&config, &instances, &plan, format).await
        }
        Command::Instances { instances, format } => cmd_instances(&config, &instances, format).await,
        Command::Config => cmd_config(&config),
    }
}

/// Build a dispatcher holding the configured instances plus any extras
async fn build_dispatcher(config: &Config, extra: &[String]) -> Dispatcher {
    let dispatcher = Dispatcher::new(config.dispatcher.clone());
    for address in config.instances.iter().chain(extra) {
        dispatcher.add_instance(address).await;
    }
    dispatcher
}

async fn cmd_simulate(config: &Config, extra: &[String], plan: &SimulationPlan, format: OutputFormat) -> Result<()> {
    debug!(?plan, %format, "cmd_simulate: called");
    let dispatcher = build_dispatcher(config, extra).await;
    let report = simulate::run(&dispatcher, plan).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

async fn cmd_instances(config: &Config, extra: &[String], format: OutputFormat) -> Result<()> {
    debug!(%format, "cmd_instances: called");
    let dispatcher = build_dispatcher(config, extra).await;
    let state = dispatcher.snapshot().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&state.instances)?),
        OutputFormat::Text => {
            if state.instances.is_empty() {
                println!("No instances configured");
            }
            print_instances(&state.instances);
        }
    }
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    print!("{}", config.to_yaml()?);
    Ok(())
}

fn print_report(report: &SimulationReport) {
    for task in &report.tasks {
        let line = match &task.outcome {
            TaskOutcome::Dispatched { address } => format!("{} {}", "✓".green(), address.cyan()),
            TaskOutcome::Rejected { reason } => format!("{} {}", "✗".red(), reason),
            TaskOutcome::Pending => format!("{} {}", "…".yellow(), "still queued".dimmed()),
        };
        println!("task {:>3} {:>6}ms  {}", task.index, task.elapsed_ms, line);
    }

    println!();
    println!(
        "dispatched: {}  rejected: {}  pending: {}  backlog: {}",
        report.dispatched().to_string().green(),
        report.rejected().to_string().red(),
        report.pending().to_string().yellow(),
        report.backlog_len
    );
    println!();
    print_instances(&report.instances);
}

fn print_instances(instances: &[InstanceSnapshot]) {
    for instance in instances {
        let state = match instance.state {
            InstanceState::Ready => instance.state.to_string().green(),
            InstanceState::Running => instance.state.to_string().yellow(),
            InstanceState::Blocked => instance.state.to_string().red(),
        };
        println!("{:<24} {:<8} active={}", instance.address, state, instance.active_count);
    }
}
