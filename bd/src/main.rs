//! batchd - batch job scheduler
//!
//! CLI entry point for simulations and statistics maintenance.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use serde::Serialize;
use statstore::{DurationType, SqliteStatisticsStore, StatisticsStore};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use batchd::cli::{Cli, Command, OutputFormat, get_log_path};
use batchd::config::{ApplicationConfig, Config};
use batchd::dispatch::{DispatchStats, spawn_pool_size_listener};
use batchd::domain::{ApplicationRegistry, JobParameters, StaticApplicationRegistry};
use batchd::executor::SimulatedExecutor;
use batchd::jobs::{JobProgress, MemoryJobStore};
use batchd::scheduler::{Scheduler, SchedulerDeps, SchedulerStats};
use batchd::stats::{CollationSummary, StatisticsAggregator, StatisticsService};
use batchd::watcher::{ConfigWatcher, spawn_application_limit_listener, spawn_application_withdrawal_listener};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

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

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Simulate {
            jobs,
            requests,
            failure_rate,
            latency_ms,
            format,
        } => {
            let options = SimulateOptions {
                jobs,
                requests,
                failure_rate,
                latency_ms,
            };
            cmd_simulate(&config, cli.config.as_ref(), options, format).await
        }
        Command::Stats {
            application,
            duration,
            format,
        } => cmd_stats(&config, application.as_deref(), duration, format),
        Command::Collate { format } => cmd_collate(&config, format),
    }
}

/// Applications to simulate against; one default when none are configured
fn simulation_applications(config: &Config) -> Vec<ApplicationConfig> {
    if !config.applications.is_empty() {
        return config.applications.clone();
    }
    vec![ApplicationConfig {
        name: "demo".to_string(),
        module: None,
        max_concurrent_requests: 4,
        max_requests_per_group: 50,
    }]
}

struct SimulateOptions {
    jobs: usize,
    requests: u64,
    failure_rate: f64,
    latency_ms: u64,
}

#[derive(Debug, Serialize)]
struct SimulationSummary {
    elapsed_ms: u64,
    jobs: Vec<JobProgress>,
    scheduler: SchedulerStats,
    dispatcher: DispatchStats,
    collation: CollationSummary,
    statistics_saved: usize,
}

async fn cmd_simulate(
    config: &Config,
    config_path: Option<&PathBuf>,
    options: SimulateOptions,
    format: OutputFormat,
) -> Result<()> {
    debug!(jobs = options.jobs, requests = options.requests, "cmd_simulate: called");
    let started = Instant::now();

    let applications = simulation_applications(config);
    let registry = Arc::new(StaticApplicationRegistry::from_config(&applications));
    registry.start_all();

    let database = config.statistics.database_path();
    let store = SqliteStatisticsStore::open(&database)
        .with_context(|| format!("Failed to open statistics store {}", database.display()))?;
    let statistics = StatisticsService::spawn(
        Box::new(store),
        registry.clone(),
        config.statistics.service_config(),
    );

    let job_store = Arc::new(MemoryJobStore::new());
    let deps = SchedulerDeps {
        job_store: job_store.clone(),
        applications: registry.clone(),
        executor: Arc::new(SimulatedExecutor::new(0, options.latency_ms, options.failure_rate)),
        statistics: Some(statistics.clone()),
    };
    let (scheduler, handle) = Scheduler::new(config.scheduler.clone(), deps);

    let (config_tx, _) = broadcast::channel(16);
    spawn_pool_size_listener(handle.dispatcher().clone(), config_tx.subscribe());
    spawn_application_limit_listener(registry.clone(), config_tx.subscribe());
    spawn_application_withdrawal_listener(
        registry.clone(),
        handle.clone(),
        Some(statistics.clone()),
        config_tx.subscribe(),
    );
    if let Some(path) = Config::resolve_path(config_path) {
        tokio::spawn(ConfigWatcher::new(path, Duration::from_secs(2), config_tx.clone()).run());
    }

    let run = tokio::spawn(scheduler.run());

    for index in 0..options.jobs {
        let application = &applications[index % applications.len()].name;
        let parameters = JobParameters::from([("index".to_string(), index.to_string())]);
        let job = job_store.submit(application, parameters, options.requests);
        handle.schedule(job);
    }
    info!(jobs = options.jobs, "Submitted simulation jobs");

    tokio::select! {
        _ = job_store.wait_idle() => {
            info!("All simulation jobs finished");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down");
        }
    }

    handle.shutdown();
    run.await.context("Scheduler task failed")??;

    let collation = statistics.collate().await?;
    let statistics_saved = statistics.shutdown().await?;

    let summary = SimulationSummary {
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        jobs: job_store.all_progress(),
        scheduler: handle.stats(),
        dispatcher: handle.dispatcher().stats(),
        collation,
        statistics_saved,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => print_simulation(&summary, &database),
    }
    Ok(())
}

fn print_simulation(summary: &SimulationSummary, database: &std::path::Path) {
    println!("{}", "Simulation complete".green().bold());
    println!("-------------------");
    println!("Elapsed:            {} ms", summary.elapsed_ms);
    println!("Groups dispatched:  {}", summary.scheduler.groups_dispatched);
    println!("Groups finished:    {}", summary.scheduler.groups_finished);
    println!("Group retries:      {}", summary.scheduler.group_retries);
    println!("Groups exhausted:   {}", summary.scheduler.groups_exhausted);
    println!("Jobs dropped:       {}", summary.scheduler.jobs_dropped);
    println!();
    for job in &summary.jobs {
        let status = if job.processing {
            "running".yellow()
        } else if job.failed_requests > 0 {
            "partial".red()
        } else {
            "done".green()
        };
        println!(
            "  job {:>4} {:<16} {:>8} completed {:>6} failed {:>6} [{}]",
            job.job_id, job.application, job.num_requests, job.completed_requests, job.failed_requests, status
        );
    }
    println!();
    println!(
        "Statistics: {} loaded, {} merged, {} deleted, {} saved -> {}",
        summary.collation.loaded,
        summary.collation.merged,
        summary.collation.deleted,
        summary.collation.saved,
        database.display()
    );
}

fn cmd_stats(
    config: &Config,
    application: Option<&str>,
    duration: Option<DurationType>,
    format: OutputFormat,
) -> Result<()> {
    debug!(?application, ?duration, ?format, "cmd_stats: called");
    let database = config.statistics.database_path();
    if !database.exists() {
        match format {
            OutputFormat::Json => println!("{}", serde_json::json!({"error": "No statistics database found"})),
            OutputFormat::Text => println!("No statistics database found at {}", database.display()),
        }
        return Ok(());
    }

    let store = SqliteStatisticsStore::open(&database)?;
    let records: Vec<_> = store
        .records()?
        .into_iter()
        .filter(|r| application.is_none_or(|app| r.application == app))
        .filter(|r| duration.is_none_or(|d| r.duration_type == d))
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        OutputFormat::Text => {
            if records.is_empty() {
                println!("No statistics recorded");
            }
            for record in records {
                let values: Vec<String> = record.values.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                println!(
                    "{:<16} {:<5} {:<13} {}",
                    record.application.bold(),
                    record.duration_type,
                    record.bucket_id(),
                    values.join(" ")
                );
            }
        }
    }
    Ok(())
}

fn cmd_collate(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_collate: called");
    let database = config.statistics.database_path();
    let mut store = SqliteStatisticsStore::open(&database)?;

    // Without configured applications every stored application counts as known
    let registry = StaticApplicationRegistry::from_config(&config.applications);
    let any_known = config.applications.is_empty();
    let is_known = |name: &str| any_known || registry.lookup(name).is_some();

    let mut aggregator = StatisticsAggregator::new();
    let summary = aggregator
        .collate(&mut store, is_known, Utc::now())
        .context("Collation failed")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => println!(
            "Collated {}: {} loaded, {} merged, {} deleted, {} saved, {} skipped",
            database.display(),
            summary.loaded,
            summary.merged,
            summary.deleted,
            summary.saved,
            summary.skipped
        ),
    }
    Ok(())
}
