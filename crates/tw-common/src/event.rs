use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of domain occurrence recorded in the event store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MessageCreated,
    MessageUpdated,
    SessionCreated,
    SessionClosed,
    SurveyTriggered,
    SurveyCompleted,
    WorkflowCompleted,
    HandoverRequested,
    SuggestionCreated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MessageCreated => "message_created",
            EventType::MessageUpdated => "message_updated",
            EventType::SessionCreated => "session_created",
            EventType::SessionClosed => "session_closed",
            EventType::SurveyTriggered => "survey_triggered",
            EventType::SurveyCompleted => "survey_completed",
            EventType::WorkflowCompleted => "workflow_completed",
            EventType::HandoverRequested => "handover_requested",
            EventType::SuggestionCreated => "suggestion_created",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of entity an event refers to. The entity itself lives in the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    ChatMessage,
    ChatSession,
    Survey,
    SurveyResponse,
    Client,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::ChatMessage => "chat_message",
            EntityType::ChatSession => "chat_session",
            EntityType::Survey => "survey",
            EntityType::SurveyResponse => "survey_response",
            EntityType::Client => "client",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record of a domain occurrence.
///
/// `entity_id` and `parent_id` are opaque references into the document store; nothing
/// here checks that they exist. Only `updated_at` may change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub event_type: EventType,
    pub entity_type: EntityType,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn new(
        event_type: EventType,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        parent_id: Option<String>,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: crate::new_id(),
            event_type,
            entity_type,
            entity_id: entity_id.into(),
            parent_id,
            data,
            created_at: now,
            updated_at: now,
        }
    }

    /// JSON body delivered to processors for this event.
    pub fn delivery_payload(&self, tenant_id: &str) -> serde_json::Value {
        serde_json::json!({
            "event_id": self.id,
            "event_type": self.event_type,
            "entity_type": self.entity_type,
            "entity_id": self.entity_id,
            "parent_id": self.parent_id,
            "tenant_id": tenant_id,
            "data": self.data,
            "created_at": self.created_at,
        })
    }
}
