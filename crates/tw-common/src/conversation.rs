//! Conversation entities owned by the document store.
//!
//! The pipeline only reads sessions and messages to resolve tenants and build workflow
//! context, and writes generated replies back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    /// Owning tenant
    pub client_id: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub handover_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(client_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: crate::new_id(),
            client_id: client_id.into(),
            status: SessionStatus::Active,
            handover_requested: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub is_suggestion: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(session_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: crate::new_id(),
            session_id: session_id.into(),
            role,
            content: content.into(),
            is_suggestion: false,
            confidence_score: None,
            attachments: Vec::new(),
            created_at: Utc::now(),
        }
    }
}
