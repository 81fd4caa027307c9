use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tw_common::{
    ChatMessage, ChatSession, Delivery, DeliveryAttempt, DeliveryStatus, Event, ProcessorConfig,
};

use crate::error::Result;

/// Append-only event log.
#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn insert_event(&self, event: &Event) -> Result<()>;
    async fn get_event(&self, id: &str) -> Result<Option<Event>>;
}

#[async_trait]
pub trait ProcessorConfigRepository: Send + Sync {
    async fn insert_config(&self, config: &ProcessorConfig) -> Result<()>;
    /// Replace an existing config; `NotFound` if the id is unknown.
    async fn update_config(&self, config: &ProcessorConfig) -> Result<()>;
    async fn get_config(&self, id: &str) -> Result<Option<ProcessorConfig>>;
    async fn delete_config(&self, id: &str) -> Result<bool>;
    async fn find_active_by_tenant(&self, tenant_id: &str) -> Result<Vec<ProcessorConfig>>;
}

/// Delivery bookkeeping.
///
/// Every status transition is a single conditional write. A `None` return from the
/// conditional methods means the precondition no longer held (someone else won).
#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    async fn insert_delivery(&self, delivery: &Delivery) -> Result<()>;
    async fn get_delivery(&self, id: &str) -> Result<Option<Delivery>>;

    /// `pending` (or `failed` with attempts left) to `in_progress`, stamping `claimed_at`.
    async fn claim_delivery(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Delivery>>;

    /// Set `current_attempts = expected_attempts + 1` and `status`, provided the delivery
    /// still has `expected_attempts` recorded, is not completed, and has budget left.
    async fn apply_attempt(
        &self,
        id: &str,
        expected_attempts: u32,
        status: DeliveryStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>>;

    /// `failed` to `pending` with a new attempt budget.
    async fn reopen_failed(
        &self,
        id: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>>;

    /// Return `in_progress` deliveries claimed before the cutoff to `pending`.
    async fn release_stale_claims(&self, claimed_before: DateTime<Utc>) -> Result<u64>;

    /// `pending`, plus `failed` with attempts left, oldest first.
    async fn list_retry_eligible(&self, limit: usize) -> Result<Vec<Delivery>>;
    async fn list_by_status(&self, status: DeliveryStatus, limit: usize) -> Result<Vec<Delivery>>;
    async fn list_by_event(&self, event_id: &str) -> Result<Vec<Delivery>>;

    async fn insert_attempt(&self, attempt: &DeliveryAttempt) -> Result<()>;
    /// Ordered by `attempt_number`.
    async fn list_attempts(&self, delivery_id: &str) -> Result<Vec<DeliveryAttempt>>;
}

/// Sessions and messages owned by the chat side of the system.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn insert_session(&self, session: &ChatSession) -> Result<()>;
    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>>;
    /// Returns false if the session was already flagged.
    async fn mark_handover(&self, session_id: &str) -> Result<bool>;

    async fn insert_message(&self, message: &ChatMessage) -> Result<()>;
    async fn get_message(&self, id: &str) -> Result<Option<ChatMessage>>;
    /// Last `limit` messages of a session, oldest first.
    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>>;
}

/// Everything the pipeline needs from the document store.
pub trait Store:
    EventRepository + ProcessorConfigRepository + DeliveryRepository + ConversationRepository
{
}

impl<T> Store for T where
    T: EventRepository + ProcessorConfigRepository + DeliveryRepository + ConversationRepository
{
}
