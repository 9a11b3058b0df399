//! Geofence engine - region membership and transition detection
//!
//! Consumes location fixes (JSON Lines on stdin), maintains per-region
//! membership state, and emits Enter/Exit/Dwell transition events (JSON
//! Lines on stdout) with durable at-least-once delivery.
//!
//! Module structure:
//! - `domain/` - Core types (Region, samples, transitions) and geometry
//! - `io/` - External interfaces (provider adapter, event dispatcher)
//! - `services/` - Business logic (Engine, RegionStore, filter, detector)
//! - `infra/` - Infrastructure (Config, Metrics, StateStore)

use clap::Parser;
use geofence_engine::domain::types::Region;
use geofence_engine::infra::{Config, Metrics, StateStore};
use geofence_engine::io::{run_stdin_provider, Dispatcher, StdoutConsumer};
use geofence_engine::services::{Engine, RegionStore};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Geofence engine - region membership and transition detection
#[derive(Parser, Debug)]
#[command(name = "geofence-engine", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Optional JSON file with region definitions to upsert at startup
    #[arg(short, long)]
    regions: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        // Events go to stdout; logs stay on stderr
        .with_writer(std::io::stderr)
        .init();

    info!(git = %env!("GIT_HASH"), "geofence-engine starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        state_dir = %config.state_dir(),
        max_accuracy_m = %config.max_accuracy_m(),
        exit_confirm_samples = %config.exit_confirm_samples(),
        exit_debounce_ms = %config.exit_debounce_ms(),
        tick_interval_ms = %config.tick_interval_ms(),
        "config_loaded"
    );

    // Durable state directory shared by all persisted tables
    let state = StateStore::open(config.state_dir())?;

    // Region registry (restores persisted definitions)
    let regions = Arc::new(RegionStore::open(state.clone())?);

    // Optional region file upserted at startup
    if let Some(path) = &args.regions {
        let content = std::fs::read_to_string(path)?;
        let definitions: Vec<Region> = serde_json::from_str(&content)?;
        for region in definitions {
            let id = region.id.clone();
            match regions.upsert(region) {
                Ok(()) => {}
                Err(e) => warn!(region = %id, error = %e, "region_file_entry_rejected"),
            }
        }
    }
    info!(regions = %regions.list().len(), "regions_registered");

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());

    // Outbound dispatcher; replays any unacknowledged events from a
    // previous run before new samples are processed
    let mut dispatcher =
        Dispatcher::open(&config, state.clone(), Arc::new(StdoutConsumer), metrics.clone())?;
    if let Err(e) = dispatcher.flush().await {
        warn!(error = %e, "startup_replay_incomplete");
    }

    // Create sample channel (bounded for backpressure)
    let (sample_tx, sample_rx) = mpsc::channel(config.sample_queue_depth());

    // Start stdin provider
    let provider_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = run_stdin_provider(sample_tx, provider_shutdown).await {
            tracing::error!(error = %e, "provider error");
        }
    });

    // Start metrics reporter (lock-free reads)
    let metrics_clone = metrics.clone();
    let regions_clone = regions.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let summary = metrics_clone.report(regions_clone.active_snapshot().len());
            summary.log();
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run engine - consumes samples until the channel closes
    let mut engine = Engine::new(&config, state, regions, dispatcher, metrics)?;
    info!("engine_started");
    engine.run(sample_rx, shutdown_rx).await;

    info!("geofence-engine shutdown complete");
    Ok(())
}
