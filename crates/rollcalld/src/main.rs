use anyhow::{Context, Result};
use rollcall_core::oracle::LabelMap;
use rollcall_core::{AttendanceTracker, TrackerConfig};
use rollcall_store::SqliteLedger;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod feed;
mod rollover;

use config::{BusKind, Config};

const BUS_NAME: &str = "org.rollcall.Attendance1";
const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(db = %config.db_path.display(), "rollcalld starting");

    let ledger = SqliteLedger::open(&config.db_path, config.ledger_timeout)
        .with_context(|| format!("opening attendance database {}", config.db_path.display()))?;

    let today = chrono::Local::now().date_naive();
    let mut tracker = AttendanceTracker::new(
        ledger,
        TrackerConfig {
            cooldown: config.cooldown,
        },
        today,
    );
    match tracker.reconcile() {
        Ok(n) => tracing::info!(day = %today, checked_in = n, "attendance cache loaded"),
        Err(e) => tracing::warn!(error = %e, "startup reconciliation failed; retrying on next tick"),
    }

    let engine = engine::spawn_engine(tracker, config.capture(), config.ledger_timeout)?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let rollover = rollover::spawn_rollover(
        engine.clone(),
        config.rollover_interval,
        || chrono::Local::now().date_naive(),
        stop_rx,
    );

    let recognition = Arc::new(AtomicBool::new(false));
    if let Err(e) = start_feed(&config, &engine, &recognition) {
        tracing::warn!(error = %e, "recognition disabled; manual check-in still available");
    }

    let service = dbus_interface::AttendanceService::new(engine.clone(), recognition);
    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("registering on D-Bus")?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    let _ = stop_tx.send(true);
    if let Err(e) = rollover.await {
        tracing::warn!(error = %e, "rollover task ended abnormally");
    }
    if let Err(e) = engine.shutdown().await {
        tracing::warn!(error = %e, "engine did not shut down cleanly");
    }

    Ok(())
}

/// Start the oracle feed if one is configured. The feed thread is detached;
/// it ends on its own when the engine stops accepting events.
fn start_feed(
    config: &Config,
    engine: &engine::EngineHandle,
    live: &feed::RecognitionFlag,
) -> Result<(), rollcall_core::AttendanceError> {
    let Some(path) = config.feed_path.as_deref() else {
        tracing::info!("ROLLCALL_FEED_PATH not set; recognition disabled");
        return Ok(());
    };
    let labels = LabelMap::load(&config.labels_path)?;
    tracing::info!(path = %config.labels_path.display(), labels = labels.len(), "label map loaded");

    feed::spawn(
        path.to_string(),
        labels,
        config.distance_threshold,
        engine.clone(),
        live.clone(),
    )?;
    tracing::info!(feed = path, threshold = config.distance_threshold, "recognition feed started");
    Ok(())
}
