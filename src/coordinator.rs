// src/coordinator.rs
//! Drives one [`HistoryMath`] from a periodic timer and the state-change feed,
//! publishing every result as a [`SensorSnapshot`] on a watch channel.
//!
//! One task per sensor; ticks and events are handled in a single `select!`
//! loop, so updates for a sensor never overlap.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::aggregator::{AggregateResult, HistoryMath};
use crate::history::{InMemoryHistory, StateChangeEvent};
use crate::period::ResolvedPeriod;
use crate::stats::StatKind;

/// What consumers see for one sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorSnapshot {
    pub name: String,
    pub unique_id: Option<String>,
    pub entity_id: String,
    #[serde(rename = "type")]
    pub stat: StatKind,
    pub value: Option<f64>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub available: bool,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SensorSnapshot {
    fn pending(math: &HistoryMath, unique_id: Option<String>) -> Self {
        Self {
            name: math.name().to_string(),
            unique_id,
            entity_id: math.entity_id().to_string(),
            stat: math.stat(),
            value: None,
            period_start: None,
            period_end: None,
            available: false,
            last_error: None,
            updated_at: None,
        }
    }

    fn apply(&mut self, result: AggregateResult, at: DateTime<Utc>) {
        self.value = result.value;
        if result.period != ResolvedPeriod::MIN {
            self.period_start = Some(result.period.start);
            self.period_end = Some(result.period.end);
        }
        self.available = true;
        self.last_error = None;
        self.updated_at = Some(at);
    }
}

pub struct SensorCoordinator {
    math: HistoryMath,
    interval: Duration,
    tx: watch::Sender<SensorSnapshot>,
}

impl SensorCoordinator {
    pub fn new(
        math: HistoryMath,
        unique_id: Option<String>,
        interval: Duration,
    ) -> (Self, watch::Receiver<SensorSnapshot>) {
        let (tx, rx) = watch::channel(SensorSnapshot::pending(&math, unique_id));
        (Self { math, interval, tx }, rx)
    }

    /// Run one update cycle and publish the outcome. Returns whether it succeeded.
    pub async fn refresh(&mut self, event: Option<&StateChangeEvent>) -> bool {
        match self.math.update(event).await {
            Ok(result) => {
                tracing::debug!(
                    target: "history_math",
                    sensor = %self.math.name(),
                    value = ?result.value,
                    "sensor updated"
                );
                let now = Utc::now();
                self.tx.send_modify(|s| s.apply(result, now));
                true
            }
            Err(e) => {
                tracing::warn!(
                    target: "history_math",
                    sensor = %self.math.name(),
                    "update failed: {e:#}"
                );
                counter!("history_math_update_errors_total", "sensor" => self.math.name().to_string())
                    .increment(1);
                let msg = e.to_string();
                self.tx.send_modify(|s| {
                    s.available = false;
                    s.last_error = Some(msg);
                });
                false
            }
        }
    }

    /// Loop until the task is aborted. The first tick fires immediately.
    pub async fn run(mut self, mut events: broadcast::Receiver<StateChangeEvent>) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh(None).await;
                }
                ev = events.recv(), if events_open => match ev {
                    Ok(ev) if ev.entity_id == self.math.entity_id() => {
                        self.refresh(Some(&ev)).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(
                            target: "history_math",
                            sensor = %self.math.name(),
                            missed,
                            "state feed lagged; refetching window"
                        );
                        self.math.invalidate();
                        self.refresh(None).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!(
                            target: "history_math",
                            sensor = %self.math.name(),
                            "state feed closed; continuing on timer only"
                        );
                        events_open = false;
                    }
                },
            }
        }
    }

    pub fn spawn(self, events: broadcast::Receiver<StateChangeEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }
}

/// Oldest window start across all sensors, or `None` while any sensor has not
/// resolved a window yet.
pub fn retention_cutoff(sensors: &[watch::Receiver<SensorSnapshot>]) -> Option<DateTime<Utc>> {
    sensors
        .iter()
        .map(|rx| rx.borrow().period_start)
        .collect::<Option<Vec<_>>>()?
        .into_iter()
        .min()
}

/// Periodically prune records no configured window can reach anymore.
pub fn spawn_retention(
    history: Arc<InMemoryHistory>,
    sensors: Vec<watch::Receiver<SensorSnapshot>>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(cutoff) = retention_cutoff(&sensors) else {
                continue;
            };
            let removed = history.prune_before(cutoff);
            if removed > 0 {
                counter!("history_math_pruned_records_total").increment(removed as u64);
                tracing::debug!(
                    target: "history_math",
                    removed,
                    cutoff = %cutoff,
                    "pruned history"
                );
            }
        }
    })
}
