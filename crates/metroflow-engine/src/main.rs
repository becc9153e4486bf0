//! Headless host for the Metroflow traffic simulation engine.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `$METROFLOW_CONFIG` or `metroflow-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Create the engine and seed configured intersections and incidents
//! 4. Subscribe a snapshot logger to the broadcast channel
//! 5. Start the tick loop and run until Ctrl-C
//! 6. Stop cleanly and log final metrics and emissions

mod error;

use std::path::PathBuf;
use std::sync::Arc;

use metroflow_core::config::{EngineConfig, LoggingConfig};
use metroflow_core::engine::Engine;
use metroflow_types::SimulationSnapshot;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "metroflow-config.yaml";

/// Log a snapshot summary every this many ticks.
const SNAPSHOT_LOG_EVERY: u64 = 50;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Load configuration.
    let (config, config_found) = load_config()?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!("metroflow-engine starting");
    if !config_found {
        info!("config file not found, using defaults");
    }
    info!(
        tick_interval_ms = config.simulation.tick_interval_ms,
        max_vehicles = config.simulation.max_vehicles,
        spawn_rate = config.simulation.spawn_rate,
        seed = ?config.simulation.seed,
        "configuration loaded"
    );

    // 3. Create the engine and seed the network.
    let intersections = config.intersections.clone();
    let incidents = config.incidents.clone();
    let engine = Engine::new(config);
    for request in intersections {
        let id = engine.add_intersection(request).await?;
        info!(intersection_id = %id, "seeded intersection");
    }
    for request in incidents {
        let id = engine.add_incident(request).await?;
        info!(incident_id = %id, "seeded incident");
    }

    // 4. Snapshot logger.
    let logger = tokio::spawn(log_snapshots(engine.subscribe()));

    // 5. Run until Ctrl-C.
    let handle = engine.start().await?;
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // 6. Stop and report.
    engine.stop();
    let summary = handle.await?;
    logger.abort();

    let metrics = engine.traffic_metrics().await;
    info!(
        ticks_run = summary.ticks_run,
        ticks_failed = summary.ticks_failed,
        final_tick = summary.final_tick,
        metrics = %serde_json::to_string(&metrics)?,
        "final traffic metrics"
    );
    let emissions = engine.calculate_emissions().await;
    info!(emissions = %serde_json::to_string(&emissions)?, "final emissions estimate");
    info!("metroflow-engine shutdown complete");
    Ok(())
}

/// Load the engine configuration.
///
/// Uses `$METROFLOW_CONFIG` when set, otherwise [`DEFAULT_CONFIG_PATH`].
/// A missing file yields defaults; the flag reports whether one was found.
fn load_config() -> Result<(EngineConfig, bool), AppError> {
    let path = std::env::var_os("METROFLOW_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        Ok((EngineConfig::from_file(&path)?, true))
    } else {
        let mut config = EngineConfig::default();
        config.simulation.apply_env_overrides();
        Ok((config, false))
    }
}

/// Install the tracing subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Drain the snapshot channel, logging a periodic summary.
async fn log_snapshots(mut rx: broadcast::Receiver<Arc<SimulationSnapshot>>) {
    loop {
        match rx.recv().await {
            Ok(snapshot) => {
                if snapshot.tick.checked_rem(SNAPSHOT_LOG_EVERY) == Some(0) {
                    info!(
                        tick = snapshot.tick,
                        vehicles = snapshot.metrics.total_vehicles,
                        avg_speed = snapshot.metrics.average_speed,
                        completed = snapshot.metrics.vehicles_completed,
                        incidents = snapshot.active_incidents.len(),
                        "snapshot"
                    );
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "snapshot logger lagging, oldest snapshots dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
