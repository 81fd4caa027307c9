//! Tidewire shared types
//!
//! Types that cross crate boundaries in the delivery pipeline:
//! - Events and the entity/event type vocabulary
//! - Processor configs (per-tenant delivery rules)
//! - Deliveries and delivery attempts
//! - The legacy task envelope consumed from the queue
//! - Conversation entities used for tenant resolution and workflows

pub mod conversation;
pub mod delivery;
pub mod event;
pub mod processor;
pub mod task;
pub mod tracing;

pub use conversation::{ChatMessage, ChatSession, MessageRole, SessionStatus};
pub use delivery::{AttemptOutcome, Delivery, DeliveryAttempt, DeliveryStatus};
pub use event::{EntityType, Event, EventType};
pub use processor::{
    BrokerPublishConfig, HttpWebhookConfig, InvalidProcessorConfig, ProcessorConfig,
    ProcessorKind, ProcessorType, WebhookAuth,
};
pub use task::{
    EnvelopeError, EventProcessorPayload, QueuedTask, TaskEnvelope, TaskPayload, TaskType,
    WorkflowPayload,
};

/// Generate a new opaque entity id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
