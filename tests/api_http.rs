// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

mod common;

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value as Json};
use tower::ServiceExt as _; // for `oneshot`

use common::{source, test_config, MockFetcher, Reply, RSS};
use newsflow::store::MemoryStore;
use newsflow::{api, AppState};

const BODY_LIMIT: usize = 1024 * 1024;
const FEED: &str = "https://wire.test/rss";
const OFF: &str = "https://off.test/rss";

/// Router over a store with one live and one disabled source.
fn test_app() -> (Router, AppState) {
    let store = Arc::new(
        MemoryStore::new().with_sources([source("wire", FEED), source("off", OFF).disabled()]),
    );
    let fetcher = Arc::new(MockFetcher::new().reply(FEED, Reply::Body(RSS.into())));
    let state = AppState::new(&test_config(), store, fetcher);
    (api::router(state.clone()), state)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Json>) -> (StatusCode, Json) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app
        .clone()
        .oneshot(req.body(body).expect("build request"))
        .await
        .expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    let v = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Json::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, v)
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _) = test_app();
    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Json::String("OK".into()));
}

#[tokio::test]
async fn collect_all_returns_summary_and_updates_sources() {
    let (app, _) = test_app();

    let (status, summary) = call(&app, "POST", "/collect-all", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["sourcesProcessed"], 1);
    assert_eq!(summary["itemsSaved"], 3);
    assert_eq!(summary["sourceErrors"], json!([]));

    let (_, sources) = call(&app, "GET", "/sources", None).await;
    let wire = sources
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["id"] == "wire")
        .unwrap();
    assert_eq!(wire["status"], "active");
    assert_eq!(wire["totalCollected"], 3);
}

#[tokio::test]
async fn single_source_collect_checks_source_first() {
    let (app, _) = test_app();

    let (status, body) = call(&app, "POST", "/sources/ghost/collect", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");

    let (status, _) = call(&app, "POST", "/sources/off/collect", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&app, "POST", "/sources/wire/collect", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["started"], true);
}

#[tokio::test]
async fn registering_a_source_twice_is_rejected() {
    let (app, _) = test_app();
    let new = json!({"name": "Fresh", "url": "https://fresh.test/rss"});

    let (status, created) = call(&app, "POST", "/sources", Some(new.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "inactive");
    assert_eq!(created["enabled"], true);

    let (status, body) = call(&app, "POST", "/sources", Some(new)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn jobs_can_be_enqueued_and_polled() {
    let (app, _) = test_app();

    let (status, created) = call(
        &app,
        "POST",
        "/jobs",
        Some(json!({"type": "fact_check", "payload": {"articleId": "a-1"}})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = created["jobId"].as_str().unwrap().to_string();

    let (status, job) = call(&app, "GET", &format!("/jobs/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["type"], "fact_check");
    assert_eq!(job["payload"]["articleId"], "a-1");

    let (status, _) = call(&app, "GET", "/jobs/does-not-exist", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, stats) = call(&app, "GET", "/jobs/stats", None).await;
    assert_eq!(stats["total"], 1);
}

#[tokio::test]
async fn job_payload_must_match_its_type() {
    let (app, _) = test_app();
    let (status, _) = call(
        &app,
        "POST",
        "/jobs",
        Some(json!({"type": "fact_check", "payload": {"itemKey": "k"}})),
    )
    .await;
    assert!(status.is_client_error(), "got {status}");

    let (_, jobs) = call(&app, "GET", "/jobs", None).await;
    assert_eq!(jobs, json!([]));
}

#[tokio::test]
async fn scheduler_lifecycle_is_idempotent() {
    let (app, state) = test_app();

    let (_, first) = call(&app, "POST", "/scheduler/start", None).await;
    assert_eq!(first, json!({"started": true}));
    let (_, second) = call(&app, "POST", "/scheduler/start", None).await;
    assert_eq!(second, json!({"started": false}));

    let (_, status) = call(&app, "GET", "/scheduler-status", None).await;
    assert_eq!(status["isRunning"], true);
    assert_eq!(status["interval"], 900_000);
    assert!(status["nextExecution"].is_string());
    assert_eq!(status["alerts"]["isRunning"], false);

    let (_, stopped) = call(&app, "POST", "/scheduler/stop", None).await;
    assert_eq!(stopped, json!({"stopped": true}));
    let (_, again) = call(&app, "POST", "/scheduler/stop", None).await;
    assert_eq!(again, json!({"stopped": false}));
    assert!(!state.collection.is_running());
}

#[tokio::test]
async fn alerts_are_generated_from_collected_news() {
    let (app, _) = test_app();
    call(&app, "POST", "/collect-all", None).await;

    let (status, summary) = call(&app, "POST", "/alerts/generate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(summary["generated"].as_u64().unwrap() >= 1);

    let (_, alerts) = call(&app, "GET", "/alerts?limit=1", None).await;
    assert_eq!(alerts.as_array().unwrap().len(), 1);
    assert_eq!(alerts[0]["alertType"], "news_sentiment");
}

#[tokio::test]
async fn workflow_stats_validates_time_range() {
    let (app, _) = test_app();

    let (status, day) = call(&app, "GET", "/workflow/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(day["timeRange"], "1d");

    let (_, week) = call(&app, "GET", "/workflow/stats?timeRange=7d", None).await;
    assert_eq!(week["timeRange"], "7d");
    assert!(week["jobs"].get("total").is_some());
    assert!(week["alerts"].get("byType").is_some());

    let (status, _) = call(&app, "GET", "/workflow/stats?timeRange=1y", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
