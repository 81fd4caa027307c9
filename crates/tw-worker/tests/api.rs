use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;
use tw_common::{AttemptOutcome, DeliveryStatus};
use tw_config::WorkerConfig;
use tw_delivery::{AttemptRecord, DeliveryTracker};
use tw_queue::MemoryBroker;
use tw_store::MemoryStore;
use tw_worker::{create_router, AdminState, TaskRouter, WorkerPool};

fn app() -> (Router, Arc<DeliveryTracker>) {
    let store = Arc::new(MemoryStore::new());
    let tracker = Arc::new(DeliveryTracker::new(store, 3));
    let pool = Arc::new(WorkerPool::new(
        Arc::new(MemoryBroker::new()),
        TaskRouter::new(),
        &WorkerConfig::default(),
    ));
    let router = create_router(AdminState { tracker: tracker.clone(), pool });
    (router, tracker)
}

async fn failed_delivery(tracker: &DeliveryTracker) -> String {
    let d = tracker
        .create_delivery("e1", "c1", serde_json::json!({}), Some(1))
        .await
        .unwrap();
    tracker
        .record_attempt(AttemptRecord::new(&d, AttemptOutcome::Failure))
        .await
        .unwrap();
    d.id
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_reports_stopped_worker() {
    let (app, _) = app();
    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "DEGRADED");
    assert_eq!(body["worker_running"], false);
}

#[tokio::test]
async fn test_unknown_delivery_is_404() {
    let (app, _) = app();
    let (status, body) = send(&app, get("/deliveries/missing")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("missing"));

    let (status, _) = send(&app, get("/deliveries/missing/attempts")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_deliveries_and_attempts_are_listed() {
    let (app, tracker) = app();
    let id = failed_delivery(&tracker).await;

    let (status, body) = send(&app, get("/deliveries/failed")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["id"], id.as_str());

    let (status, body) = send(&app, get(&format!("/deliveries/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");

    let (status, body) = send(&app, get(&format!("/deliveries/{}/attempts", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["attempt_number"], 1);
}

#[tokio::test]
async fn test_retry_reopens_failed_delivery_once() {
    let (app, tracker) = app();
    let id = failed_delivery(&tracker).await;
    let retry = || {
        Request::builder()
            .method("POST")
            .uri(format!("/deliveries/{}/retry", id))
            .body(Body::empty())
            .unwrap()
    };

    let (status, body) = send(&app, retry()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["max_attempts"], 2);
    assert_eq!(tracker.get(&id).await.unwrap().status, DeliveryStatus::Pending);

    let (status, _) = send(&app, retry()).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_retry_with_explicit_attempts() {
    let (app, tracker) = app();
    let id = failed_delivery(&tracker).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/deliveries/{}/retry", id))
        .header("content-type", "application/json")
        .body(Body::from(r#"{"additional_attempts": 3}"#))
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["max_attempts"], 4);
}

#[tokio::test]
async fn test_retry_with_zero_attempts_and_no_budget_is_conflict() {
    let (app, tracker) = app();
    let id = failed_delivery(&tracker).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/deliveries/{}/retry", id))
        .header("content-type", "application/json")
        .body(Body::from(r#"{"additional_attempts": 0}"#))
        .unwrap();
    let (status, _) = send(&app, request).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(tracker.get(&id).await.unwrap().status, DeliveryStatus::Failed);
}

#[tokio::test]
async fn test_worker_stats_endpoint() {
    let (app, _) = app();
    let (status, body) = send(&app, get("/worker/stats")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], false);
    assert_eq!(body["slots"].as_array().unwrap().len(), 0);
}
