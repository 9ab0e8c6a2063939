//! # History
//! Recorded state changes and the store trait the aggregator queries.
//!
//! [`InMemoryHistory`] is the bundled recorder: per-entity vectors kept in
//! `last_changed` order behind an `RwLock`, scanned on the blocking pool.
//! It grows with the feed; [`InMemoryHistory::prune_before`] bounds it to
//! what the configured windows can still reach.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// One recorded state of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub state: String,
    pub last_changed: DateTime<Utc>,
}

impl StateRecord {
    pub fn new(state: impl Into<String>, last_changed: DateTime<Utc>) -> Self {
        Self {
            state: state.into(),
            last_changed,
        }
    }
}

/// Live notification that an entity changed state. `new_state == None`
/// means the entity was removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    pub entity_id: String,
    pub old_state: Option<StateRecord>,
    pub new_state: Option<StateRecord>,
}

#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// State changes of `entity_id` with `start <= last_changed < end`, oldest
    /// first. With `include_start_time_state`, the state that was current at
    /// `start` is included as the first record even if it changed earlier.
    async fn state_changes_during_period(
        &self,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        include_start_time_state: bool,
    ) -> Result<Vec<StateRecord>, StoreError>;
}

type Records = HashMap<String, Vec<StateRecord>>;

#[derive(Debug, Clone, Default)]
pub struct InMemoryHistory {
    inner: Arc<RwLock<Records>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a state. Out-of-order inserts are placed by `last_changed`.
    pub fn record(&self, entity_id: &str, state: impl Into<String>, at: DateTime<Utc>) {
        self.record_event(entity_id, state, at);
    }

    /// Record a state and return the matching change notification.
    pub fn record_event(
        &self,
        entity_id: &str,
        state: impl Into<String>,
        at: DateTime<Utc>,
    ) -> StateChangeEvent {
        let rec = StateRecord::new(state, at);
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let v = map.entry(entity_id.to_string()).or_default();
        let idx = v.partition_point(|r| r.last_changed <= at);
        let old_state = idx.checked_sub(1).map(|i| v[i].clone());
        v.insert(idx, rec.clone());

        StateChangeEvent {
            entity_id: entity_id.to_string(),
            old_state,
            new_state: Some(rec),
        }
    }

    /// Drop records older than `cutoff`, keeping per entity the last one
    /// before it so the state current at `cutoff` stays answerable.
    /// Returns how many records were removed.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let mut removed = 0;
        for v in map.values_mut() {
            let keep_from = v
                .partition_point(|r| r.last_changed < cutoff)
                .saturating_sub(1);
            v.drain(..keep_from);
            removed += keep_from;
        }
        removed
    }

    pub fn count(&self, entity_id: &str) -> usize {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(entity_id).map_or(0, Vec::len)
    }
}

#[async_trait::async_trait]
impl HistoryStore for InMemoryHistory {
    async fn state_changes_during_period(
        &self,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        include_start_time_state: bool,
    ) -> Result<Vec<StateRecord>, StoreError> {
        let inner = Arc::clone(&self.inner);
        let entity_id = entity_id.to_string();
        let out = tokio::task::spawn_blocking(move || {
            let map = inner.read().unwrap_or_else(|e| e.into_inner());
            map.get(&entity_id)
                .map(|v| scan_period(v, start, end, include_start_time_state))
                .unwrap_or_default()
        })
        .await?;
        Ok(out)
    }
}

fn scan_period(
    records: &[StateRecord],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    include_start_time_state: bool,
) -> Vec<StateRecord> {
    let first_in = records.partition_point(|r| r.last_changed < start);
    let first_out = records.partition_point(|r| r.last_changed < end).max(first_in);

    let mut out = Vec::with_capacity(first_out - first_in + 1);
    if include_start_time_state && first_in > 0 {
        // Leading edge: the state that was current at `start`.
        let prev = &records[first_in - 1];
        out.push(StateRecord::new(prev.state.clone(), start));
    }
    out.extend_from_slice(&records[first_in..first_out]);
    out
}
