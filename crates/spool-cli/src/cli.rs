//! spool - exercise bounded connection pools from the command line
//!
//! `spool simulate` runs concurrent callers against a registry of pools
//! backed by an in-memory factory and prints the resulting statistics.
//! `spool settings` validates a settings file and shows the pool
//! configuration each destination would get.

mod logging;
mod simulation;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use comfy_table::{Table, presets::UTF8_FULL};
use serde::Serialize;
use spool_connection::{ConfigListener, PoolRegistry, PoolSettings, PoolStats, StatsReport};
use spool_core::{Destination, OverflowPolicy};
use tokio::sync::watch;

use crate::logging::LoggingConfig;
use crate::simulation::{Outcomes, SimulatedFactory, Workload};

#[derive(Parser, Debug)]
#[command(name = "spool", version)]
#[command(about = "Exercise bounded connection pools", long_about = None)]
struct Cli {
    /// Log every acquisition and release
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Also write JSON logs to this directory
    #[arg(long, global = true, env = "SPOOL_JSON_LOG_DIR", value_name = "DIR")]
    json_log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a simulated workload against a registry of pools
    Simulate(SimulateArgs),

    /// Validate a settings file and show the resulting pool configurations
    Settings {
        /// Settings file (JSON)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Destinations to show besides those with overrides
        #[arg(long = "destination", short = 'd', value_name = "NAME")]
        destinations: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Settings file (JSON); defaults are used when omitted
    #[arg(long, env = "SPOOL_SETTINGS", value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Destination to send callers to (repeatable)
    #[arg(long = "destination", short = 'd', value_name = "NAME", default_value = "db/primary")]
    destinations: Vec<String>,

    /// Number of concurrent callers
    #[arg(long, default_value_t = 8)]
    tasks: usize,

    /// Capacity of every pool, overriding the settings file
    #[arg(long, value_name = "SIZE")]
    pool_size: Option<usize>,

    /// Overflow policy, overriding the settings file
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,

    /// Publish this capacity halfway through the run
    #[arg(long, value_name = "SIZE")]
    resize_to: Option<usize>,

    /// How long callers keep acquiring
    #[arg(long, default_value_t = 2000, value_name = "MS")]
    duration_ms: u64,

    /// Simulated time to open a connection
    #[arg(long, default_value_t = 20, value_name = "MS")]
    connect_latency_ms: u64,

    /// How long each caller holds a connection
    #[arg(long, default_value_t = 10, value_name = "MS")]
    hold_ms: u64,

    /// Refuse every Nth connection attempt
    #[arg(long, value_name = "N")]
    fail_every: Option<u64>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    Block,
    FailFast,
}

impl From<PolicyArg> for OverflowPolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::Block => OverflowPolicy::Block,
            PolicyArg::FailFast => OverflowPolicy::FailFast,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Serialize)]
struct SimulationSummary<'a> {
    outcomes: &'a Outcomes,
    report: &'a StatsReport,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logging_config = if cli.verbose {
        LoggingConfig::verbose()
    } else {
        LoggingConfig::default()
    };
    logging_config.json_log_dir = cli.json_log_dir.clone();
    let _guard = logging::init(logging_config)?;

    match cli.command {
        Commands::Simulate(args) => simulate(args).await,
        Commands::Settings { file, destinations } => show_settings(&file, &destinations),
    }
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<PoolSettings> {
    let Some(path) = path else {
        return Ok(PoolSettings::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings from {}", path.display()))?;
    let settings: PoolSettings = serde_json::from_str(&raw)
        .with_context(|| format!("invalid settings in {}", path.display()))?;
    Ok(settings)
}

async fn simulate(args: SimulateArgs) -> anyhow::Result<()> {
    let mut settings = load_settings(args.settings.as_deref())?;
    if let Some(size) = args.pool_size {
        settings.connection_pool_size = size;
    }
    if let Some(policy) = args.policy {
        settings.policy = policy.into();
    }
    settings.validate()?;

    let factory = SimulatedFactory::new(
        Duration::from_millis(args.connect_latency_ms),
        args.fail_every,
    );
    let registry: Arc<PoolRegistry<SimulatedFactory>> =
        Arc::new(PoolRegistry::new(factory, settings.clone()));
    let (updates, rx) = watch::channel(settings.clone());
    let listener = ConfigListener::spawn(&registry, rx);

    let workload = Workload {
        destinations: args.destinations.iter().map(Destination::new).collect(),
        tasks: args.tasks,
        duration: Duration::from_millis(args.duration_ms),
        hold: Duration::from_millis(args.hold_ms),
        acquire_timeout: Duration::from_millis(settings.acquire_timeout_ms),
    };
    tracing::info!(
        destinations = workload.destinations.len(),
        tasks = workload.tasks,
        capacity = settings.connection_pool_size,
        policy = ?settings.policy,
        "starting simulation"
    );

    let resize = async {
        if let Some(size) = args.resize_to {
            tokio::time::sleep(workload.duration / 2).await;
            tracing::info!(capacity = size, "publishing new pool size");
            updates.send_modify(|settings| settings.connection_pool_size = size);
        }
    };
    let (outcomes, ()) = tokio::join!(
        simulation::run_workload(Arc::clone(&registry), &workload),
        resize
    );

    let report = registry.report();
    registry.drain_all().await;
    listener.stop().await;

    match args.format {
        OutputFormat::Json => {
            let summary = SimulationSummary {
                outcomes: &outcomes,
                report: &report,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Table => print_report(&outcomes, &report),
    }
    Ok(())
}

fn print_report(outcomes: &Outcomes, report: &StatsReport) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Destination",
        "Capacity",
        "Idle",
        "Active",
        "Created",
        "Destroyed",
        "Acquired",
        "Errors",
        "Timeouts",
        "Exhausted",
    ]);
    for (destination, stats) in &report.destinations {
        table.add_row(stats_row(destination.as_str(), stats));
    }
    if report.omitted_destinations > 0 {
        table.add_row(vec![format!(
            "... {} more",
            report.omitted_destinations
        )]);
    }
    table.add_row(stats_row("total", &report.pool));
    println!("{table}");

    let waits = report.pool.wait_times();
    let mut histogram = Table::new();
    histogram
        .load_preset(UTF8_FULL)
        .set_header(vec!["Wait (ms)", "Acquisitions"]);
    for (index, count) in waits.counts().iter().enumerate() {
        let bucket = match waits.bounds_ms().get(index) {
            Some(bound) => format!("<= {bound}"),
            None => "slower".to_string(),
        };
        histogram.add_row(vec![bucket, count.to_string()]);
    }
    println!("{histogram}");

    println!(
        "callers: {} acquired, {} failed (connect {}, timeout {}, exhausted {}, draining {})",
        outcomes.acquired,
        outcomes.failures(),
        outcomes.connect_failed,
        outcomes.timeouts,
        outcomes.exhausted,
        outcomes.draining
    );
}

fn stats_row(name: &str, stats: &PoolStats) -> Vec<String> {
    vec![
        name.to_string(),
        stats.capacity().to_string(),
        stats.idle().to_string(),
        stats.active().to_string(),
        stats.created().to_string(),
        stats.destroyed().to_string(),
        stats.acquired().to_string(),
        stats.errors().to_string(),
        stats.timeouts().to_string(),
        stats.exhausted().to_string(),
    ]
}

fn show_settings(file: &Path, destinations: &[String]) -> anyhow::Result<()> {
    let settings = load_settings(Some(file))?;
    settings.validate()?;

    let mut names: Vec<Destination> = settings.overrides.keys().cloned().collect();
    names.extend(destinations.iter().map(Destination::new));
    names.sort();
    names.dedup();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Destination",
        "Capacity",
        "Policy",
        "Acquire timeout",
        "Idle timeout",
        "Max lifetime",
    ]);
    let default_row = settings.config_for(&Destination::new(""));
    let rows = std::iter::once(("(default)".to_string(), default_row)).chain(
        names
            .iter()
            .map(|name| (name.to_string(), settings.config_for(name))),
    );
    for (name, config) in rows {
        table.add_row(vec![
            name,
            config.max_size().to_string(),
            format!("{:?}", config.policy()),
            format!("{:?}", config.acquire_timeout()),
            format!("{:?}", config.idle_timeout()),
            config
                .max_lifetime()
                .map_or_else(|| "none".to_string(), |lifetime| format!("{lifetime:?}")),
        ]);
    }
    println!("{table}");
    Ok(())
}
