//! resilient-probe
//!
//! Probes HTTP endpoints through the resilient call layer.
//!
//! ```text
//!   check <URL>   one (or --repeat N) resilient GET, JSON report on stdout
//!   monitor       probe [[monitor.targets]] every interval until SIGINT/SIGTERM,
//!                 reloading --config on change
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use url::Url;

use resilient_call::config::{load_config, ConfigWatcher, ResilienceConfig, TargetConfig};
use resilient_call::health::{HealthMonitor, TargetReport};
use resilient_call::lifecycle::{wait_for_signal, Shutdown};
use resilient_call::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "resilient-probe")]
#[command(about = "Probe HTTP endpoints through retries and circuit breakers", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Overrides observability.log_level.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run resilient GETs against one URL and print JSON reports
    Check {
        url: String,

        /// Circuit name for this endpoint.
        #[arg(long, default_value = "check")]
        circuit: String,

        /// Overrides retries.max_retries.
        #[arg(long)]
        max_retries: Option<u32>,

        /// Number of sequential calls sharing the circuit.
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },
    /// Probe the configured targets until interrupted
    Monitor,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ResilienceConfig::default(),
    };

    logging::init_logging(cli.log_level.as_deref().unwrap_or(&config.observability.log_level));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "resilient-probe starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to install metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    match cli.command {
        Commands::Check {
            url,
            circuit,
            max_retries,
            repeat,
        } => run_check(config, url, circuit, max_retries, repeat).await,
        Commands::Monitor => run_monitor(config, cli.config.as_deref())
            .await
            .map(|()| ExitCode::SUCCESS),
    }
}

async fn run_check(
    mut config: ResilienceConfig,
    url: String,
    circuit: String,
    max_retries: Option<u32>,
    repeat: u32,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    Url::parse(&url)?;
    if let Some(max_retries) = max_retries {
        config.retries.max_retries = max_retries;
    }
    config.monitor.targets = vec![TargetConfig { name: circuit, url }];

    let monitor = HealthMonitor::new(config)?;
    let mut reports = Vec::new();
    for _ in 0..repeat.max(1) {
        reports.extend(monitor.check_all().await);
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);

    if last_round_down(&reports) {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// A check fails when the final probe did not come back up.
fn last_round_down(reports: &[TargetReport]) -> bool {
    reports.last().is_some_and(|r| !r.up)
}

async fn run_monitor(
    config: ResilienceConfig,
    config_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.monitor.targets.is_empty() {
        tracing::warn!("No monitor targets configured");
    }

    // The watcher handle must outlive the monitor.
    let (_watcher, updates) = match config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        None => {
            let (_, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let shutdown = Shutdown::new();
    let monitor = HealthMonitor::new(config)?;
    let handle = tokio::spawn(monitor.run(updates, shutdown.subscribe()));

    let signal = wait_for_signal().await?;
    shutdown.trigger(signal);
    handle.await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
