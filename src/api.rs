use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tokio::sync::watch;

use crate::coordinator::SensorSnapshot;

/// Read-only view over every coordinator's latest snapshot.
#[derive(Clone)]
pub struct AppState {
    sensors: Arc<Vec<watch::Receiver<SensorSnapshot>>>,
}

impl AppState {
    pub fn new(sensors: Vec<watch::Receiver<SensorSnapshot>>) -> Self {
        Self {
            sensors: Arc::new(sensors),
        }
    }

    fn snapshots(&self) -> Vec<SensorSnapshot> {
        self.sensors.iter().map(|rx| rx.borrow().clone()).collect()
    }

    /// Lookup by name or unique id.
    fn find(&self, key: &str) -> Option<SensorSnapshot> {
        self.sensors
            .iter()
            .map(|rx| rx.borrow().clone())
            .find(|s| s.name == key || s.unique_id.as_deref() == Some(key))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/sensors", get(list_sensors))
        .route("/sensors/{key}", get(get_sensor))
        .with_state(state)
}

async fn list_sensors(State(state): State<AppState>) -> Json<Vec<SensorSnapshot>> {
    Json(state.snapshots())
}

async fn get_sensor(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<SensorSnapshot>, (StatusCode, String)> {
    state
        .find(&key)
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("unknown sensor '{key}'")))
}
