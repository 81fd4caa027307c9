#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tw_common::{
    BrokerPublishConfig, ChatMessage, ChatSession, HttpWebhookConfig, MessageRole, ProcessorConfig,
    ProcessorKind,
};
use tw_config::{DeliveryConfig, TaskRoutes};
use tw_delivery::{
    BrokerSender, DeliveryPipeline, DispatchOutcome, Dispatcher, HttpSender, ProcessorDispatcher,
};
use tw_queue::MemoryBroker;
use tw_store::{ConversationRepository, MemoryStore};

pub const TENANT: &str = "tenant-t";

/// Broker sender that records publishes instead of connecting anywhere.
#[derive(Default)]
pub struct RecordingBroker {
    pub published: Mutex<Vec<(BrokerPublishConfig, serde_json::Value)>>,
}

#[async_trait]
impl BrokerSender for RecordingBroker {
    async fn publish(&self, config: &BrokerPublishConfig, payload: &serde_json::Value) -> DispatchOutcome {
        self.published.lock().push((config.clone(), payload.clone()));
        DispatchOutcome::success()
    }
}

/// Dispatcher that sleeps, then returns a fixed outcome.
pub struct SlowDispatcher {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl SlowDispatcher {
    pub fn new(delay: Duration) -> Self {
        Self { delay, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dispatcher for SlowDispatcher {
    async fn dispatch(&self, _processor: &ProcessorKind, _payload: &serde_json::Value) -> DispatchOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        DispatchOutcome::success()
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub broker: MemoryBroker,
    pub broker_sender: Arc<RecordingBroker>,
    pub pipeline: DeliveryPipeline,
}

pub fn harness(dispatch_on_create: bool) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let broker = MemoryBroker::new();
    let broker_sender = Arc::new(RecordingBroker::default());
    let http = HttpSender::new(Duration::from_secs(2), Duration::from_secs(5)).unwrap();
    let dispatcher = Arc::new(ProcessorDispatcher::new(http, broker_sender.clone()));

    let config = DeliveryConfig { dispatch_on_create, ..DeliveryConfig::default() };
    let pipeline = DeliveryPipeline::build(
        store.clone(),
        Arc::new(broker.clone()),
        dispatcher,
        &config,
        TaskRoutes::default(),
    );
    Harness { store, broker, broker_sender, pipeline }
}

/// Session owned by [`TENANT`] with a user message whose id is `message_id`.
pub async fn seed_conversation(store: &MemoryStore, message_id: &str) -> (ChatSession, ChatMessage) {
    let session = ChatSession::new(TENANT);
    let mut message = ChatMessage::new(&session.id, MessageRole::User, "hello");
    message.id = message_id.to_string();
    store.insert_session(&session).await.unwrap();
    store.insert_message(&message).await.unwrap();
    (session, message)
}

pub fn webhook_config(url: impl Into<String>) -> ProcessorConfig {
    ProcessorConfig::new(TENANT, "webhook", ProcessorKind::HttpWebhook(HttpWebhookConfig::new(url))).unwrap()
}
