//! Queue task envelope
//!
//! Producers write the legacy envelope `{"task", "id", "kwargs", "retries"}`. The worker
//! decodes it into a [`QueuedTask`] with a typed payload; anything that does not decode is
//! malformed and is never retried.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::event::{EntityType, Event, EventType};

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("envelope has no task field")]
    MissingTask,

    #[error("unknown task type: {0}")]
    UnknownTask(String),

    #[error("kwargs do not match {task} payload: {source}")]
    InvalidKwargs {
        task: TaskType,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ChatWorkflow,
    SuggestionWorkflow,
    EventProcessor,
}

impl TaskType {
    pub const ALL: [TaskType; 3] = [
        TaskType::ChatWorkflow,
        TaskType::SuggestionWorkflow,
        TaskType::EventProcessor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::ChatWorkflow => "chat_workflow",
            TaskType::SuggestionWorkflow => "suggestion_workflow",
            TaskType::EventProcessor => "event_processor",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EnvelopeError::UnknownTask(s.to_string()))
    }
}

/// Wire-level envelope as written by producers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub kwargs: serde_json::Value,
    #[serde(default)]
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPayload {
    pub message_id: String,
    pub session_id: String,
    #[serde(default)]
    pub suggestion_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventProcessorPayload {
    pub event_id: String,
    pub event_type: EventType,
    pub entity_type: EntityType,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl From<&Event> for EventProcessorPayload {
    fn from(event: &Event) -> Self {
        Self {
            event_id: event.id.clone(),
            event_type: event.event_type,
            entity_type: event.entity_type,
            entity_id: event.entity_id.clone(),
            parent_id: event.parent_id.clone(),
            data: event.data.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskPayload {
    Workflow(WorkflowPayload),
    EventProcessor(EventProcessorPayload),
}

/// Decoded task ready for routing.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTask {
    pub task_type: TaskType,
    pub task_id: String,
    pub payload: TaskPayload,
    pub retry_count: u32,
}

impl QueuedTask {
    pub fn event_processor(event: &Event) -> Self {
        Self {
            task_type: TaskType::EventProcessor,
            task_id: crate::new_id(),
            payload: TaskPayload::EventProcessor(event.into()),
            retry_count: 0,
        }
    }

    pub fn workflow(message_id: impl Into<String>, session_id: impl Into<String>, suggestion_mode: bool) -> Self {
        let task_type = if suggestion_mode {
            TaskType::SuggestionWorkflow
        } else {
            TaskType::ChatWorkflow
        };
        Self {
            task_type,
            task_id: crate::new_id(),
            payload: TaskPayload::Workflow(WorkflowPayload {
                message_id: message_id.into(),
                session_id: session_id.into(),
                suggestion_mode,
            }),
            retry_count: 0,
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: TaskEnvelope = serde_json::from_slice(body)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: TaskEnvelope) -> Result<Self, EnvelopeError> {
        let task = envelope
            .task
            .filter(|t| !t.is_empty())
            .ok_or(EnvelopeError::MissingTask)?;
        let task_type: TaskType = task.parse()?;

        let kwargs = match envelope.kwargs {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other,
        };
        let payload = match task_type {
            TaskType::ChatWorkflow | TaskType::SuggestionWorkflow => serde_json::from_value(kwargs)
                .map(TaskPayload::Workflow),
            TaskType::EventProcessor => serde_json::from_value(kwargs)
                .map(TaskPayload::EventProcessor),
        }
        .map_err(|source| EnvelopeError::InvalidKwargs { task: task_type, source })?;

        Ok(Self {
            task_type,
            task_id: envelope.id.filter(|id| !id.is_empty()).unwrap_or_else(crate::new_id),
            payload,
            retry_count: envelope.retries,
        })
    }

    pub fn to_envelope(&self) -> TaskEnvelope {
        let kwargs = match &self.payload {
            TaskPayload::Workflow(p) => serde_json::to_value(p),
            TaskPayload::EventProcessor(p) => serde_json::to_value(p),
        };
        TaskEnvelope {
            task: Some(self.task_type.as_str().to_string()),
            id: Some(self.task_id.clone()),
            kwargs: kwargs.unwrap_or(serde_json::Value::Null),
            retries: self.retry_count,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.to_envelope())
    }
}
