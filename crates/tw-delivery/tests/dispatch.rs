mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{harness, webhook_config, SlowDispatcher, TENANT};
use tw_common::{AttemptOutcome, DeliveryStatus, HttpWebhookConfig, ProcessorConfig, ProcessorKind, WebhookAuth};
use tw_delivery::{AttemptRecord, DeliveryError, DeliveryRunner, DeliveryTracker};
use tw_store::MemoryStore;
use tw_store::ProcessorConfigRepository;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_three_server_errors_exhaust_delivery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .expect(3)
        .mount(&server)
        .await;

    let h = harness(false);
    let config = h
        .pipeline
        .registry
        .create(webhook_config(format!("{}/hook", server.uri())))
        .await
        .unwrap();
    let tracker = &h.pipeline.tracker;
    let delivery = tracker
        .create_delivery("e1", &config.id, serde_json::json!({"event_id": "e1"}), None)
        .await
        .unwrap();

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let attempt = h.pipeline.runner.dispatch_delivery(&delivery.id).await.unwrap().unwrap();
        assert_eq!(attempt.outcome, AttemptOutcome::Failure);
        assert_eq!(attempt.status_code, Some(500));
        assert_eq!(attempt.response_payload.as_deref(), Some("upstream down"));
        statuses.push(tracker.get(&delivery.id).await.unwrap().status);
    }
    assert_eq!(
        statuses,
        vec![DeliveryStatus::Pending, DeliveryStatus::Pending, DeliveryStatus::Failed]
    );

    let attempts = tracker.list_attempts(&delivery.id).await.unwrap();
    let numbers: Vec<u32> = attempts.iter().map(|a| a.attempt_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);

    // Terminal: neither the dispatcher nor a direct record may add a fourth attempt.
    assert!(h.pipeline.runner.dispatch_delivery(&delivery.id).await.unwrap().is_none());
    let failed = tracker.get(&delivery.id).await.unwrap();
    assert_eq!(failed.current_attempts, 3);
    let mut fourth = AttemptRecord::new(&failed, AttemptOutcome::Failure);
    fourth.attempt_number = 4;
    assert!(matches!(
        tracker.record_attempt(fourth).await,
        Err(DeliveryError::Terminal { .. })
    ));
    assert_eq!(tracker.list_attempts(&delivery.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_success_on_second_attempt_completes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let h = harness(false);
    let config = h.pipeline.registry.create(webhook_config(server.uri())).await.unwrap();
    let delivery = h
        .pipeline
        .tracker
        .create_delivery("e1", &config.id, serde_json::json!({}), None)
        .await
        .unwrap();

    let first = h.pipeline.runner.dispatch_delivery(&delivery.id).await.unwrap().unwrap();
    assert_eq!(first.outcome, AttemptOutcome::Failure);

    let summary = h.pipeline.runner.sweep(10).await.unwrap();
    assert_eq!(summary.examined, 1);
    assert_eq!(summary.succeeded, 1);

    let attempts = h.pipeline.tracker.list_attempts(&delivery.id).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[1].attempt_number, 2);
    assert_eq!(attempts[1].outcome, AttemptOutcome::Success);
    assert_eq!(attempts[1].status_code, Some(200));
    assert_eq!(
        h.pipeline.tracker.get(&delivery.id).await.unwrap().status,
        DeliveryStatus::Completed
    );

    let again = h.pipeline.runner.sweep(10).await.unwrap();
    assert_eq!(again.examined, 0);
    assert!(h.pipeline.runner.dispatch_delivery(&delivery.id).await.unwrap().is_none());
    assert_eq!(h.pipeline.tracker.list_attempts(&delivery.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_webhook_sends_auth_headers_and_signature() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/signed"))
        .and(header("authorization", "Bearer tok-123"))
        .and(header("content-type", "application/json"))
        .and(header("x-tenant", "t"))
        .and(header_exists("x-tidewire-signature"))
        .and(header_exists("x-tidewire-timestamp"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut webhook = HttpWebhookConfig::new(format!("{}/signed", server.uri()));
    webhook.auth = Some(WebhookAuth::Bearer { token: "tok-123".into() });
    webhook.signing_secret = Some("s3cret".into());
    webhook.headers.insert("x-tenant".into(), "t".into());

    let h = harness(false);
    let config = h
        .pipeline
        .registry
        .create(ProcessorConfig::new(TENANT, "signed", ProcessorKind::HttpWebhook(webhook)).unwrap())
        .await
        .unwrap();
    let delivery = h
        .pipeline
        .tracker
        .create_delivery("e1", &config.id, serde_json::json!({"a": 1}), None)
        .await
        .unwrap();

    let attempt = h.pipeline.runner.dispatch_delivery(&delivery.id).await.unwrap().unwrap();
    assert_eq!(attempt.outcome, AttemptOutcome::Success);
    assert_eq!(attempt.status_code, Some(204));
}

#[tokio::test]
async fn test_basic_auth_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut webhook = HttpWebhookConfig::new(server.uri());
    webhook.auth = Some(WebhookAuth::Basic { username: "user".into(), password: "pass".into() });

    let h = harness(false);
    let config = h
        .pipeline
        .registry
        .create(ProcessorConfig::new(TENANT, "basic", ProcessorKind::HttpWebhook(webhook)).unwrap())
        .await
        .unwrap();
    let delivery = h
        .pipeline
        .tracker
        .create_delivery("e1", &config.id, serde_json::json!({}), None)
        .await
        .unwrap();

    let attempt = h.pipeline.runner.dispatch_delivery(&delivery.id).await.unwrap().unwrap();
    assert_eq!(attempt.outcome, AttemptOutcome::Success);
}

#[tokio::test]
async fn test_unreachable_endpoint_is_a_failed_attempt() {
    let h = harness(false);
    // Nothing listens on port 9 locally.
    let config = h.pipeline.registry.create(webhook_config("http://127.0.0.1:9/hook")).await.unwrap();
    let delivery = h
        .pipeline
        .tracker
        .create_delivery("e1", &config.id, serde_json::json!({}), None)
        .await
        .unwrap();

    let attempt = h.pipeline.runner.dispatch_delivery(&delivery.id).await.unwrap().unwrap();
    assert_eq!(attempt.outcome, AttemptOutcome::Failure);
    assert_eq!(attempt.status_code, None);
    assert!(attempt.error_message.is_some());
}

#[tokio::test]
async fn test_deactivated_config_records_failure() {
    let h = harness(false);
    let config = h.pipeline.registry.create(webhook_config("https://a.example.com")).await.unwrap();
    let delivery = h
        .pipeline
        .tracker
        .create_delivery("e1", &config.id, serde_json::json!({}), None)
        .await
        .unwrap();
    h.pipeline.registry.set_active(&config.id, false).await.unwrap();

    let attempt = h.pipeline.runner.dispatch_delivery(&delivery.id).await.unwrap().unwrap();
    assert_eq!(attempt.outcome, AttemptOutcome::Failure);
    assert_eq!(attempt.error_message.as_deref(), Some("processor config is inactive"));

    h.store.delete_config(&config.id).await.unwrap();
    let attempt = h.pipeline.runner.dispatch_delivery(&delivery.id).await.unwrap().unwrap();
    assert_eq!(attempt.error_message.as_deref(), Some("processor config no longer exists"));
}

fn runner_with(store: Arc<MemoryStore>, dispatcher: Arc<SlowDispatcher>, timeout: Duration) -> DeliveryRunner {
    let tracker = Arc::new(DeliveryTracker::new(store.clone(), 3));
    DeliveryRunner::new(tracker, store, dispatcher, timeout, 4)
}

#[tokio::test]
async fn test_concurrent_dispatch_sends_once() {
    let store = Arc::new(MemoryStore::new());
    let config = webhook_config("https://a.example.com");
    store.insert_config(&config).await.unwrap();
    let dispatcher = Arc::new(SlowDispatcher::new(Duration::from_millis(100)));
    let runner = runner_with(store.clone(), dispatcher.clone(), Duration::from_secs(5));
    let delivery = runner
        .tracker()
        .create_delivery("e1", &config.id, serde_json::json!({}), None)
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        runner.dispatch_delivery(&delivery.id),
        runner.dispatch_delivery(&delivery.id)
    );
    let sent = [a.unwrap(), b.unwrap()].iter().filter(|r| r.is_some()).count();

    assert_eq!(sent, 1);
    assert_eq!(dispatcher.calls(), 1);
    assert_eq!(runner.tracker().list_attempts(&delivery.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_dispatch_timeout_is_a_failed_attempt() {
    let store = Arc::new(MemoryStore::new());
    let config = webhook_config("https://a.example.com");
    store.insert_config(&config).await.unwrap();
    let dispatcher = Arc::new(SlowDispatcher::new(Duration::from_secs(5)));
    let runner = runner_with(store, dispatcher, Duration::from_millis(50));
    let delivery = runner
        .tracker()
        .create_delivery("e1", &config.id, serde_json::json!({}), None)
        .await
        .unwrap();

    let attempt = runner.dispatch_delivery(&delivery.id).await.unwrap().unwrap();
    assert_eq!(attempt.outcome, AttemptOutcome::Failure);
    assert!(attempt.error_message.unwrap().contains("timed out"));
    assert_eq!(
        runner.tracker().get(&delivery.id).await.unwrap().status,
        DeliveryStatus::Pending
    );
}

#[tokio::test]
async fn test_sweep_dispatches_all_pending() {
    let store = Arc::new(MemoryStore::new());
    let config = webhook_config("https://a.example.com");
    store.insert_config(&config).await.unwrap();
    let dispatcher = Arc::new(SlowDispatcher::new(Duration::from_millis(10)));
    let runner = runner_with(store, dispatcher.clone(), Duration::from_secs(5));
    for i in 0..6 {
        runner
            .tracker()
            .create_delivery(&format!("e{}", i), &config.id, serde_json::json!({}), None)
            .await
            .unwrap();
    }

    let summary = runner.sweep(100).await.unwrap();
    assert_eq!(summary.examined, 6);
    assert_eq!(summary.succeeded, 6);
    assert_eq!(dispatcher.calls(), 6);
    assert!(runner
        .tracker()
        .list_by_status(DeliveryStatus::Completed, 100)
        .await
        .unwrap()
        .len()
        == 6);
}
