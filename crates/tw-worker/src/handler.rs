//! Task routing
//!
//! A decoded [`QueuedTask`] goes to the handler registered for its [`TaskType`]. A type with no
//! registered handler is malformed for this worker and is never retried.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use tw_common::{QueuedTask, TaskPayload, TaskType};
use tw_delivery::EventProcessor;

use crate::error::{HandlerError, Result};

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: QueuedTask) -> Result<()>;
}

#[derive(Default, Clone)]
pub struct TaskRouter {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl TaskRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, task_type: TaskType, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(task_type, handler);
        self
    }

    pub fn handles(&self, task_type: TaskType) -> bool {
        self.handlers.contains_key(&task_type)
    }

    pub async fn route(&self, task: QueuedTask) -> Result<()> {
        let handler = self
            .handlers
            .get(&task.task_type)
            .cloned()
            .ok_or_else(|| HandlerError::malformed(format!("no handler registered for {}", task.task_type)))?;
        debug!(task_id = %task.task_id, task_type = %task.task_type, "Routing task");
        handler.handle(task).await
    }
}

/// Runs the delivery fan-out for an `event_processor` task.
pub struct EventProcessorHandler {
    processor: Arc<EventProcessor>,
}

impl EventProcessorHandler {
    pub fn new(processor: Arc<EventProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl TaskHandler for EventProcessorHandler {
    async fn handle(&self, task: QueuedTask) -> Result<()> {
        let TaskPayload::EventProcessor(payload) = task.payload else {
            return Err(HandlerError::malformed(format!(
                "task {} carries a workflow payload",
                task.task_id
            )));
        };

        let report = self.processor.process(&payload).await?;
        if report.tenant_id.is_none() {
            debug!(task_id = %task.task_id, event_id = %payload.event_id, "Event has no tenant, nothing to deliver");
        }
        Ok(())
    }
}
