use std::sync::Arc;

use chrono::Utc;
use tw_common::{Delivery, DeliveryStatus, HttpWebhookConfig, ProcessorConfig, ProcessorKind};
use tw_store::{
    DeliveryRepository, MemoryStore, ProcessorConfigRepository, Store, StoreError,
};

fn webhook(tenant: &str) -> ProcessorConfig {
    ProcessorConfig::new(
        tenant,
        "hook",
        ProcessorKind::HttpWebhook(HttpWebhookConfig::new("https://example.com/hook")),
    )
    .unwrap()
}

#[tokio::test]
async fn test_active_configs_are_tenant_scoped() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    let a = webhook("tenant-a");
    let mut inactive = webhook("tenant-a");
    inactive.is_active = false;
    let b = webhook("tenant-b");
    for c in [&a, &inactive, &b] {
        store.insert_config(c).await.unwrap();
    }

    let found = store.find_active_by_tenant("tenant-a").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, a.id);
}

#[tokio::test]
async fn test_update_unknown_config_is_not_found() {
    let store = MemoryStore::new();
    let err = store
        .update_config(&webhook("t"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { entity: "processor_config", .. }));
}

#[tokio::test]
async fn test_retry_eligible_listing() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    let pending = Delivery::new("e1", "c1", serde_json::json!({}), 3);
    let mut completed = Delivery::new("e1", "c2", serde_json::json!({}), 3);
    completed.status = DeliveryStatus::Completed;
    completed.current_attempts = 1;
    let mut exhausted = Delivery::new("e1", "c3", serde_json::json!({}), 3);
    exhausted.status = DeliveryStatus::Failed;
    exhausted.current_attempts = 3;
    let mut failed_with_budget = Delivery::new("e1", "c4", serde_json::json!({}), 3);
    failed_with_budget.status = DeliveryStatus::Failed;
    failed_with_budget.current_attempts = 1;

    for d in [&pending, &completed, &exhausted, &failed_with_budget] {
        store.insert_delivery(d).await.unwrap();
    }

    let mut ids: Vec<String> = store
        .list_retry_eligible(10)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    ids.sort();
    let mut expected = vec![pending.id.clone(), failed_with_budget.id.clone()];
    expected.sort();
    assert_eq!(ids, expected);

    // failed-with-budget can be claimed like pending
    let claimed = store
        .claim_delivery(&failed_with_budget.id, Utc::now())
        .await
        .unwrap();
    assert!(claimed.is_some());
    assert!(store.claim_delivery(&exhausted.id, Utc::now()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reopen_only_failed() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let mut d = Delivery::new("e1", "c1", serde_json::json!({}), 3);
    d.status = DeliveryStatus::Failed;
    d.current_attempts = 3;
    store.insert_delivery(&d).await.unwrap();

    let reopened = store.reopen_failed(&d.id, 5, Utc::now()).await.unwrap().unwrap();
    assert_eq!(reopened.status, DeliveryStatus::Pending);
    assert_eq!(reopened.max_attempts, 5);
    assert!(store.reopen_failed(&d.id, 6, Utc::now()).await.unwrap().is_none());
}
