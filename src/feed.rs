// src/feed.rs
//! Line-based state feed: `entity_id state [rfc3339]` per line.
//!
//! Each accepted line is written to the history store and broadcast as a
//! [`StateChangeEvent`] to the sensor coordinators.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast;

use crate::history::{InMemoryHistory, StateChangeEvent};

/// One parsed feed line.
#[derive(Debug, Clone, PartialEq)]
pub struct StateLine {
    pub entity_id: String,
    pub state: String,
    pub at: Option<DateTime<Utc>>,
}

/// Parse a feed line. Blank lines and `#` comments yield `Ok(None)`.
pub fn parse_state_line(line: &str) -> Result<Option<StateLine>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut parts = line.split_whitespace();
    let (Some(entity_id), Some(state)) = (parts.next(), parts.next()) else {
        bail!("expected `entity_id state [timestamp]`, got {line:?}");
    };
    let at = parts
        .next()
        .map(|ts| {
            DateTime::parse_from_rfc3339(ts)
                .map(|t| t.with_timezone(&Utc))
                .with_context(|| format!("bad timestamp {ts:?}"))
        })
        .transpose()?;
    if let Some(extra) = parts.next() {
        bail!("unexpected trailing field {extra:?}");
    }
    Ok(Some(StateLine {
        entity_id: entity_id.to_string(),
        state: state.to_string(),
        at,
    }))
}

/// Read lines until EOF, recording and broadcasting each state change.
/// Returns how many lines were accepted.
pub async fn pump_lines<R>(
    reader: R,
    history: &InMemoryHistory,
    events: &broadcast::Sender<StateChangeEvent>,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut accepted = 0;
    while let Some(line) = lines.next_line().await.context("reading state feed")? {
        match parse_state_line(&line) {
            Ok(Some(sl)) => {
                let at = sl.at.unwrap_or_else(Utc::now);
                let ev = history.record_event(&sl.entity_id, sl.state, at);
                // No subscribers is fine; the history still has the record.
                let _ = events.send(ev);
                accepted += 1;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(target: "feed", "skipping line: {e:#}"),
        }
    }
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn lines_parse() {
        assert_eq!(parse_state_line("   ").unwrap(), None);
        assert_eq!(parse_state_line("# comment").unwrap(), None);

        let sl = parse_state_line("sensor.t 21.5").unwrap().unwrap();
        assert_eq!(sl.entity_id, "sensor.t");
        assert_eq!(sl.state, "21.5");
        assert!(sl.at.is_none());

        let sl = parse_state_line("sensor.t unavailable 2025-09-06T09:00:00Z")
            .unwrap()
            .unwrap();
        assert_eq!(sl.at, Some(Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap()));

        assert!(parse_state_line("sensor.t").is_err());
        assert!(parse_state_line("sensor.t 1 yesterday").is_err());
        assert!(parse_state_line("sensor.t 1 2025-09-06T09:00:00Z extra").is_err());
    }

    #[tokio::test]
    async fn pump_records_and_broadcasts() {
        let history = InMemoryHistory::new();
        let (tx, mut rx) = broadcast::channel(16);
        let input = b"sensor.a 1 2025-09-06T09:00:00Z\nbroken\n\nsensor.a 2 2025-09-06T09:01:00Z\n";

        let n = pump_lines(&input[..], &history, &tx).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(history.count("sensor.a"), 2);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.new_state.unwrap().state, "1");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.old_state.unwrap().state, "1");
    }
}
