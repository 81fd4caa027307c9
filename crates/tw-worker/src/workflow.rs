//! Chat and suggestion workflows
//!
//! Both load the triggering message and its session, ask the AI collaborator for a response
//! given the recent conversation, persist it as an assistant message and publish an event for
//! it. Replies additionally detect the zero-confidence handover condition.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};
use tw_common::{ChatMessage, EntityType, EventType, MessageRole, QueuedTask, TaskPayload, TaskType, WorkflowPayload};
use tw_delivery::EventPublisher;
use tw_store::ConversationRepository;

use crate::ai::{ContextMessage, GenerateRequest, GenerationMode, ResponseGenerator};
use crate::error::{HandlerError, Result};
use crate::handler::TaskHandler;

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOutcome {
    Generated { message_id: String, handover: bool },
    /// Session is with a human agent; no reply was generated.
    SkippedHandover,
}

pub struct WorkflowHandler {
    conversations: Arc<dyn ConversationRepository>,
    generator: Arc<dyn ResponseGenerator>,
    publisher: Arc<EventPublisher>,
    context_window: usize,
}

impl WorkflowHandler {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        generator: Arc<dyn ResponseGenerator>,
        publisher: Arc<EventPublisher>,
        context_window: usize,
    ) -> Self {
        Self { conversations, generator, publisher, context_window }
    }

    pub async fn run(&self, payload: &WorkflowPayload, mode: GenerationMode) -> Result<WorkflowOutcome> {
        let message = self
            .conversations
            .get_message(&payload.message_id)
            .await?
            .ok_or_else(|| HandlerError::not_found("chat_message", &payload.message_id))?;
        if message.session_id != payload.session_id {
            return Err(HandlerError::malformed(format!(
                "message {} belongs to session {}, not {}",
                message.id, message.session_id, payload.session_id
            )));
        }

        let session = self
            .conversations
            .get_session(&payload.session_id)
            .await?
            .ok_or_else(|| HandlerError::not_found("chat_session", &payload.session_id))?;
        if mode == GenerationMode::Reply && session.handover_requested {
            info!(session_id = %session.id, message_id = %message.id, "Session in handover, skipping reply");
            return Ok(WorkflowOutcome::SkippedHandover);
        }

        let context: Vec<ContextMessage> = self
            .conversations
            .recent_messages(&session.id, self.context_window)
            .await?
            .iter()
            .filter(|m| m.id != message.id)
            .map(ContextMessage::from)
            .collect();

        let request = GenerateRequest { message: message.content.clone(), context, mode };
        let generated = self.generator.generate(&request).await?;
        let handover = mode == GenerationMode::Reply && generated.wants_handover();

        let mut reply = ChatMessage::new(&session.id, MessageRole::Assistant, &generated.text);
        reply.is_suggestion = mode == GenerationMode::Suggestion;
        reply.confidence_score = generated.confidence_score;
        reply.attachments = generated.attachments;
        self.conversations.insert_message(&reply).await?;

        let event_type = match mode {
            GenerationMode::Reply => EventType::MessageCreated,
            GenerationMode::Suggestion => EventType::SuggestionCreated,
        };
        let data = json!({
            "session_id": session.id,
            "in_reply_to": message.id,
            "role": "assistant",
            "is_suggestion": reply.is_suggestion,
            "confidence_score": reply.confidence_score,
        });
        self.publisher
            .publish_event(event_type, EntityType::ChatMessage, &reply.id, Some(session.id.clone()), as_map(data))
            .await?;

        if handover {
            self.request_handover(&session.id, &reply.id).await?;
        }

        info!(
            session_id = %session.id,
            message_id = %reply.id,
            mode = mode.as_str(),
            handover,
            "Workflow response stored"
        );
        Ok(WorkflowOutcome::Generated { message_id: reply.id, handover })
    }

    async fn request_handover(&self, session_id: &str, message_id: &str) -> Result<()> {
        if !self.conversations.mark_handover(session_id).await? {
            // Another worker flagged it first and owns the event.
            return Ok(());
        }
        warn!(session_id, message_id, "Zero confidence response, handing session over");
        let data = json!({ "message_id": message_id, "reason": "zero_confidence" });
        self.publisher
            .publish_event(EventType::HandoverRequested, EntityType::ChatSession, session_id, None, as_map(data))
            .await?;
        Ok(())
    }
}

fn as_map(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

#[async_trait]
impl TaskHandler for WorkflowHandler {
    async fn handle(&self, task: QueuedTask) -> Result<()> {
        let TaskPayload::Workflow(payload) = &task.payload else {
            return Err(HandlerError::malformed(format!(
                "task {} carries an event payload",
                task.task_id
            )));
        };
        let mode = if task.task_type == TaskType::SuggestionWorkflow || payload.suggestion_mode {
            GenerationMode::Suggestion
        } else {
            GenerationMode::Reply
        };
        self.run(payload, mode).await.map(|_| ())
    }
}
