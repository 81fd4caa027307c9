#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tw_common::{
    ChatMessage, ChatSession, EventProcessorPayload, HttpWebhookConfig, MessageRole, ProcessorConfig,
    ProcessorKind, QueuedTask, TaskPayload,
};
use tw_config::{DeliveryConfig, TaskRoutes, WorkerConfig};
use tw_delivery::{DeliveryPipeline, DispatchOutcome, Dispatcher};
use tw_queue::{MemoryBroker, Settlement};
use tw_store::{ConversationRepository, MemoryStore};
use tw_worker::{AiError, GenerateRequest, GeneratedResponse, ResponseGenerator};

pub const TENANT: &str = "tenant-t";

pub struct OkDispatcher;

#[async_trait]
impl Dispatcher for OkDispatcher {
    async fn dispatch(&self, _processor: &ProcessorKind, _payload: &serde_json::Value) -> DispatchOutcome {
        DispatchOutcome::success()
    }
}

/// Generator returning a fixed response and remembering what it was asked.
pub struct StubGenerator {
    pub response: GeneratedResponse,
    pub calls: AtomicUsize,
    pub last: Mutex<Option<GenerateRequest>>,
}

impl StubGenerator {
    pub fn new(text: &str, confidence: f64) -> Self {
        Self {
            response: GeneratedResponse {
                text: text.to_string(),
                confidence_score: Some(confidence),
                attachments: Vec::new(),
            },
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResponseGenerator for StubGenerator {
    async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedResponse, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = Some(request.clone());
        Ok(self.response.clone())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub broker: MemoryBroker,
    pub pipeline: DeliveryPipeline,
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let broker = MemoryBroker::new();
    let config = DeliveryConfig { dispatch_on_create: false, ..DeliveryConfig::default() };
    let pipeline = DeliveryPipeline::build(
        store.clone(),
        Arc::new(broker.clone()),
        Arc::new(OkDispatcher),
        &config,
        TaskRoutes::default(),
    );
    Harness { store, broker, pipeline }
}

pub fn worker_config(queues: &[&str], concurrency: usize) -> WorkerConfig {
    WorkerConfig {
        queues: queues.iter().map(|q| q.to_string()).collect(),
        concurrency,
        ..WorkerConfig::default()
    }
}

pub fn webhook_config() -> ProcessorConfig {
    ProcessorConfig::new(
        TENANT,
        "hook",
        ProcessorKind::HttpWebhook(HttpWebhookConfig::new("https://hooks.example.com/in")),
    )
    .unwrap()
}

/// Session for TENANT with one earlier user message and the message `message_id`.
pub async fn seed_conversation(store: &MemoryStore, message_id: &str, text: &str) -> ChatSession {
    let session = ChatSession::new(TENANT);
    store.insert_session(&session).await.unwrap();

    let earlier = ChatMessage::new(&session.id, MessageRole::User, "hello");
    store.insert_message(&earlier).await.unwrap();

    let mut message = ChatMessage::new(&session.id, MessageRole::User, text);
    message.id = message_id.to_string();
    store.insert_message(&message).await.unwrap();
    session
}

pub async fn wait_for_settlements(broker: &MemoryBroker, n: usize) -> Vec<Settlement> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let settled = broker.settlements();
            if settled.len() >= n {
                return settled;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for settlements")
}

pub fn event_payloads(broker: &MemoryBroker, queue: &str) -> Vec<EventProcessorPayload> {
    broker
        .queued(queue)
        .iter()
        .map(|body| match QueuedTask::decode(body).unwrap().payload {
            TaskPayload::EventProcessor(p) => p,
            other => panic!("unexpected payload {:?}", other),
        })
        .collect()
}
