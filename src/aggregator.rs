//! # History aggregator
//! Keeps the samples of the current window cached between updates and
//! recomputes the statistic on every trigger.
//!
//! The store is only queried when the cache cannot be trusted: first run,
//! window start moved, window shrank or moved back, the window grew while the
//! old end was still in the future, or the previous run saw a window that had
//! not started yet. Otherwise live events are appended in place.
//!
//! A refetch already contains every record the store held at query time, so
//! live events stamped at or before the newest fetched record are not
//! appended again. Events can still be queued behind a refetch (feed backlog,
//! first run, a window rollover) and would otherwise be counted twice.
//!
//! Known approximation: when the window only grows forward past an end that
//! had already elapsed, records written to the store in between without a
//! live event are not picked up until the next refetch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use tracing::debug;

use crate::error::{HistoryMathError, Result};
use crate::history::{HistoryStore, StateChangeEvent, StateRecord};
use crate::period::{resolve, ResolvedPeriod, WindowSpec};
use crate::stats::{parse_numeric, StatKind};

/// Minimal projection of a recorded state: value and change time in
/// fractional unix seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub value: String,
    pub observed_at: f64,
}

impl From<&StateRecord> for Sample {
    fn from(r: &StateRecord) -> Self {
        Self {
            value: r.state.clone(),
            observed_at: unix_seconds(r.last_changed),
        }
    }
}

/// Output of one update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregateResult {
    pub value: Option<f64>,
    pub period: ResolvedPeriod,
}

/// Aggregator for one monitored entity. Not shared: `update` takes `&mut self`.
pub struct HistoryMath {
    name: String,
    entity_id: String,
    window: WindowSpec,
    stat: StatKind,
    store: Arc<dyn HistoryStore>,

    previous_period: ResolvedPeriod,
    samples: Vec<Sample>,
    period_started_in_future: bool,
    last_result: AggregateResult,
    /// Newest `last_changed` returned by the last refetch.
    fetched_through: Option<DateTime<Utc>>,
}

impl HistoryMath {
    pub fn new(
        name: impl Into<String>,
        entity_id: impl Into<String>,
        window: WindowSpec,
        stat: StatKind,
        store: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_id: entity_id.into(),
            window,
            stat,
            store,
            previous_period: ResolvedPeriod::MIN,
            samples: Vec::new(),
            period_started_in_future: false,
            last_result: AggregateResult {
                value: None,
                period: ResolvedPeriod::MIN,
            },
            fetched_through: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn stat(&self) -> StatKind {
        self.stat
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn last_result(&self) -> AggregateResult {
        self.last_result
    }

    /// Drop the cached window so the next update refetches from the store.
    /// Used when live events may have been missed.
    pub fn invalidate(&mut self) {
        self.previous_period = ResolvedPeriod::MIN;
    }

    /// Update at the current wall-clock instant.
    pub async fn update(&mut self, event: Option<&StateChangeEvent>) -> Result<AggregateResult> {
        self.update_at(event, Utc::now()).await
    }

    /// Update with an explicit evaluation instant.
    pub async fn update_at(
        &mut self,
        event: Option<&StateChangeEvent>,
        now: DateTime<Utc>,
    ) -> Result<AggregateResult> {
        let previous = self.previous_period;
        let current = resolve(&self.window, now)?;

        let (cur_start, cur_end) = current.floored();
        let (prev_start, prev_end) = previous.floored();
        let now_ts = now.timestamp();

        counter!("history_math_updates_total", "sensor" => self.name.clone()).increment(1);

        if cur_start > now_ts {
            // History cannot tell the future.
            self.samples.clear();
            self.fetched_through = None;
            self.period_started_in_future = true;
            self.last_result = AggregateResult {
                value: None,
                period: current,
            };
            self.previous_period = current;
            counter!("history_math_future_window_total", "sensor" => self.name.clone())
                .increment(1);
            gauge!("history_math_samples", "sensor" => self.name.clone()).set(0.0);
            return Ok(self.last_result);
        }

        let cache_valid = !self.period_started_in_future
            && cur_start == prev_start
            && (cur_end == prev_end || (cur_end >= prev_end && prev_end <= now_ts));

        if cache_valid {
            let new_data = match event.and_then(|e| e.new_state.as_ref()) {
                Some(state) if self.already_fetched(state) => {
                    debug!(
                        target: "history_math",
                        sensor = %self.name,
                        last_changed = %state.last_changed,
                        "event covered by the last refetch; not appending"
                    );
                    false
                }
                Some(state) => {
                    let changed = state.last_changed.timestamp();
                    if cur_start <= changed && changed <= cur_end {
                        self.samples.push(Sample::from(state));
                        counter!(
                            "history_math_incremental_append_total",
                            "sensor" => self.name.clone()
                        )
                        .increment(1);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            };

            if !new_data && cur_end < now_ts {
                // Window elapsed and nothing new: the value cannot have changed.
                debug!(
                    target: "history_math",
                    sensor = %self.name,
                    "window elapsed without new data; keeping previous result"
                );
                counter!("history_math_fast_path_total", "sensor" => self.name.clone())
                    .increment(1);
                self.previous_period = current;
                return Ok(self.last_result);
            }
        } else {
            self.refetch(current).await?;
            self.period_started_in_future = false;
        }

        let value = self.compute(now_ts);
        gauge!("history_math_samples", "sensor" => self.name.clone())
            .set(self.samples.len() as f64);

        self.last_result = AggregateResult {
            value,
            period: current,
        };
        self.previous_period = current;
        Ok(self.last_result)
    }

    async fn refetch(&mut self, period: ResolvedPeriod) -> Result<()> {
        let records = self
            .store
            .state_changes_during_period(&self.entity_id, period.start, period.end, true)
            .await
            .map_err(|source| HistoryMathError::Storage {
                entity_id: self.entity_id.clone(),
                source,
            })?;

        counter!("history_math_refetch_total", "sensor" => self.name.clone()).increment(1);
        debug!(
            target: "history_math",
            sensor = %self.name,
            records = records.len(),
            "refetched window from history"
        );
        self.samples = records.iter().map(Sample::from).collect();
        self.fetched_through = records.iter().map(|r| r.last_changed).max();
        Ok(())
    }

    fn already_fetched(&self, state: &StateRecord) -> bool {
        self.fetched_through
            .is_some_and(|through| state.last_changed <= through)
    }

    fn compute(&self, now_ts: i64) -> Option<f64> {
        let values: Vec<f64> = self
            .samples
            .iter()
            .filter(|s| {
                let future = s.observed_at.floor() as i64 > now_ts;
                if future {
                    debug!(
                        target: "history_math",
                        observed_at = s.observed_at,
                        now = now_ts,
                        "skipping future timestamp"
                    );
                }
                !future
            })
            .filter_map(|s| parse_numeric(&s.value))
            .collect();

        self.stat.apply(&values)
    }
}

fn unix_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp() as f64 + f64::from(t.timestamp_subsec_nanos()) / 1e9
}
