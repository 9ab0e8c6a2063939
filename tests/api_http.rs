// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /sensors
// - GET /sensors/{name | unique_id}

use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::Value as Json;
use tower::ServiceExt as _; // for `oneshot`

use history_math::api::{self, AppState};
use history_math::coordinator::SensorCoordinator;
use history_math::{HistoryMath, InMemoryHistory, StatKind, Template, WindowSpec};

const BODY_LIMIT: usize = 1024 * 1024;

/// Router over two sensors; the first has been refreshed once.
async fn test_router() -> Router {
    let history = Arc::new(InMemoryHistory::new());
    history.record("sensor.t", "21.5", Utc::now() - Duration::minutes(5));

    let window = || WindowSpec::EndDuration {
        end: Arc::new(Template::parse("now").unwrap()),
        duration: Duration::hours(1),
    };

    let max = HistoryMath::new("Temp max", "sensor.t", window(), StatKind::Max, history.clone());
    let (mut c1, rx1) =
        SensorCoordinator::new(max, Some("temp_max".into()), StdDuration::from_secs(60));
    assert!(c1.refresh(None).await);

    let mean = HistoryMath::new("Temp mean", "sensor.t", window(), StatKind::Mean, history);
    let (_c2, rx2) = SensorCoordinator::new(mean, None, StdDuration::from_secs(60));

    api::router(AppState::new(vec![rx1, rx2]))
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

#[tokio::test]
async fn health_returns_ok() {
    let (status, body) = get(test_router().await, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap().trim(), "ok");
}

#[tokio::test]
async fn sensors_lists_all_snapshots() {
    let (status, body) = get(test_router().await, "/sensors").await;
    assert_eq!(status, StatusCode::OK);

    let v: Json = serde_json::from_slice(&body).expect("json array");
    let arr = v.as_array().expect("array");
    assert_eq!(arr.len(), 2);

    assert_eq!(arr[0]["name"], "Temp max");
    assert_eq!(arr[0]["type"], "max");
    assert_eq!(arr[0]["value"], 21.5);
    assert_eq!(arr[0]["available"], true);
    assert!(arr[0]["period_start"].is_string());

    // Never refreshed: pending and unavailable.
    assert_eq!(arr[1]["type"], "mean");
    assert!(arr[1]["value"].is_null());
    assert_eq!(arr[1]["available"], false);
}

#[tokio::test]
async fn sensor_lookup_by_name_or_unique_id() {
    let app = test_router().await;

    let (status, body) = get(app.clone(), "/sensors/temp_max").await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["entity_id"], "sensor.t");

    let (status, _) = get(app.clone(), "/sensors/Temp%20mean").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(app, "/sensors/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(String::from_utf8(body).unwrap().contains("nope"));
}
