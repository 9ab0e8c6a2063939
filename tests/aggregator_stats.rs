// tests/aggregator_stats.rs
//
// End-to-end statistic values through the aggregator and the in-memory store.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use history_math::error::ExpressionError;
use history_math::period::SharedExpr;
use history_math::{HistoryMath, InMemoryHistory, StatKind, WindowSpec};

const ENTITY: &str = "sensor.power";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap()
}

fn fixed(t: DateTime<Utc>) -> SharedExpr {
    Arc::new(move |_now: DateTime<Utc>| -> Result<DateTime<Utc>, ExpressionError> { Ok(t) })
}

/// Aggregate `records` (offset seconds from t0) over `[t0, t0 + 1h)` at `now`.
async fn aggregate(stat: StatKind, records: &[(&str, i64)], now: DateTime<Utc>) -> Option<f64> {
    let history = Arc::new(InMemoryHistory::new());
    for (state, secs) in records {
        history.record(ENTITY, *state, t0() + Duration::seconds(*secs));
    }
    let window = WindowSpec::StartEnd {
        start: fixed(t0()),
        end: fixed(t0() + Duration::hours(1)),
    };
    let mut m = HistoryMath::new("stats", ENTITY, window, stat, history);
    m.update_at(None, now).await.unwrap().value
}

fn after_window() -> DateTime<Utc> {
    t0() + Duration::hours(2)
}

const TEN_TWENTY_THIRTY: [(&str, i64); 3] = [("10", 0), ("20", 60), ("30", 120)];

#[tokio::test]
async fn mean_of_three() {
    let v = aggregate(StatKind::Mean, &TEN_TWENTY_THIRTY, after_window()).await;
    assert_eq!(v, Some(20.0));
}

#[tokio::test]
async fn range_of_three() {
    let v = aggregate(StatKind::Range, &TEN_TWENTY_THIRTY, after_window()).await;
    assert_eq!(v, Some(20.0));
}

#[tokio::test]
async fn change_is_last_minus_first() {
    let v = aggregate(StatKind::Change, &TEN_TWENTY_THIRTY, after_window()).await;
    assert_eq!(v, Some(20.0));
    let v = aggregate(StatKind::Change, &[("30", 0), ("12", 60)], after_window()).await;
    assert_eq!(v, Some(-18.0));
}

#[tokio::test]
async fn median_of_even_count_averages_middle() {
    let recs = [("1", 0), ("2", 1), ("3", 2), ("4", 3)];
    let v = aggregate(StatKind::Median, &recs, after_window()).await;
    assert_eq!(v, Some(2.5));
}

#[tokio::test]
async fn last_numeric_value_skips_unavailable() {
    let v = aggregate(StatKind::Last, &[("unavailable", 0), ("5", 1)], after_window()).await;
    assert_eq!(v, Some(5.0));

    // Trailing non-numeric state doesn't hide the last number either.
    let v = aggregate(StatKind::Last, &[("5", 0), ("unknown", 1)], after_window()).await;
    assert_eq!(v, Some(5.0));
}

#[tokio::test]
async fn all_non_numeric_or_empty_is_none() {
    let v = aggregate(StatKind::Max, &[("unavailable", 0), ("on", 5)], after_window()).await;
    assert_eq!(v, None);
    let v = aggregate(StatKind::Mean, &[], after_window()).await;
    assert_eq!(v, None);
}

#[tokio::test]
async fn future_dated_samples_are_excluded() {
    let recs = [("10", 0), ("20", 600), ("99", 2400)];
    let now = t0() + Duration::minutes(30);
    assert_eq!(aggregate(StatKind::Max, &recs, now).await, Some(20.0));
    assert_eq!(aggregate(StatKind::Last, &recs, now).await, Some(20.0));
}

#[tokio::test]
async fn state_before_window_counts_from_start() {
    // "50" was current when the window opened; "5" arrives later.
    let recs = [("50", -600), ("5", 60)];
    let now = after_window();
    assert_eq!(aggregate(StatKind::Max, &recs, now).await, Some(50.0));
    assert_eq!(aggregate(StatKind::Min, &recs, now).await, Some(5.0));
    assert_eq!(aggregate(StatKind::Change, &recs, now).await, Some(-45.0));
}

#[tokio::test]
async fn records_at_or_after_window_end_are_not_fetched() {
    let recs = [("1", 0), ("1000", 3600)];
    assert_eq!(aggregate(StatKind::Max, &recs, after_window()).await, Some(1.0));
}
