use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("history_math_updates_total", "Update cycles started per sensor.");
        describe_counter!(
            "history_math_refetch_total",
            "Window refetches from the history store."
        );
        describe_counter!(
            "history_math_incremental_append_total",
            "Live state changes appended without a refetch."
        );
        describe_counter!(
            "history_math_fast_path_total",
            "Updates that reused the previous result (window elapsed, no new data)."
        );
        describe_counter!(
            "history_math_future_window_total",
            "Updates where the window had not started yet."
        );
        describe_counter!(
            "history_math_update_errors_total",
            "Update cycles that failed (expression or store errors)."
        );
        describe_counter!(
            "history_math_pruned_records_total",
            "Recorded states dropped from the in-memory history."
        );
        describe_gauge!("history_math_samples", "Cached samples in the current window.");
    });
}

impl Metrics {
    /// Install the Prometheus recorder.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
