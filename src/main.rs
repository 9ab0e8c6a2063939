//! history-math service entrypoint.
//! Loads sensor config, spawns one coordinator per sensor, feeds state changes
//! from stdin and serves the latest results over HTTP.

use std::sync::Arc;

use anyhow::{Context, Result};
use history_math::{
    api::{self, AppState},
    config,
    coordinator::{self, SensorCoordinator},
    feed,
    metrics::Metrics,
    InMemoryHistory,
};
use tokio::io::BufReader;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_BIND: &str = "127.0.0.1:8123";
const ENV_BIND: &str = "HISTORY_MATH_BIND";
const EVENT_CHANNEL_CAPACITY: usize = 1024;
const RETENTION_SWEEP: std::time::Duration = std::time::Duration::from_secs(300);

/// Compact logs by default; `HISTORY_MATH_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("history_math=info,feed=info,warn"));

    let json = std::env::var("HISTORY_MATH_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let metrics = Metrics::init()?;
    let cfg = config::load_default()?;
    if cfg.sensors.is_empty() {
        warn!("no sensors configured; set {}", config::ENV_CONFIG_PATH);
    }

    let history = Arc::new(InMemoryHistory::new());
    let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let mut snapshots = Vec::with_capacity(cfg.sensors.len());
    for sensor in &cfg.sensors {
        let math = sensor.build(history.clone())?;
        let (coordinator, rx) =
            SensorCoordinator::new(math, sensor.unique_id.clone(), sensor.update_interval());
        coordinator.spawn(events_tx.subscribe());
        info!(
            sensor = %sensor.name,
            entity_id = %sensor.entity_id,
            stat = %sensor.stat,
            "sensor started"
        );
        snapshots.push(rx);
    }

    coordinator::spawn_retention(history.clone(), snapshots.clone(), RETENTION_SWEEP);

    {
        let history = history.clone();
        let events_tx = events_tx.clone();
        tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            match feed::pump_lines(stdin, &history, &events_tx).await {
                Ok(n) => info!(target: "feed", lines = n, "state feed reached EOF"),
                Err(e) => warn!(target: "feed", "state feed failed: {e:#}"),
            }
        });
    }

    let app = api::router(AppState::new(snapshots)).merge(metrics.router());

    let bind = std::env::var(ENV_BIND).unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!("listening on {bind}");
    axum::serve(listener, app).await.context("http server")?;
    Ok(())
}
