//! Event Publisher
//!
//! Persist the event, then enqueue an `event_processor` task. When the queue cannot take the
//! task, processing runs in-process instead. That fallback path is counted in
//! `tw_publisher_fallback_total`, logged at `warn`, and reported as
//! [`PublishOutcome::FallbackSpawned`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use tw_common::{EntityType, Event, EventProcessorPayload, EventType, QueuedTask, TaskType};
use tw_config::TaskRoutes;
use tw_queue::TaskPublisher;
use tw_store::EventRepository;

use crate::error::Result;
use crate::processing::EventProcessor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum PublishOutcome {
    Enqueued { queue: String, task_id: String },
    FallbackSpawned,
}

#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event: Event,
    pub outcome: PublishOutcome,
}

pub struct EventPublisher {
    events: Arc<dyn EventRepository>,
    queue: Arc<dyn TaskPublisher>,
    routes: TaskRoutes,
    processor: Arc<EventProcessor>,
    fallbacks: TaskTracker,
}

impl EventPublisher {
    pub fn new(
        events: Arc<dyn EventRepository>,
        queue: Arc<dyn TaskPublisher>,
        routes: TaskRoutes,
        processor: Arc<EventProcessor>,
    ) -> Self {
        Self {
            events,
            queue,
            routes,
            processor,
            fallbacks: TaskTracker::new(),
        }
    }

    pub fn queue_for(&self, task_type: TaskType) -> &str {
        match task_type {
            TaskType::ChatWorkflow => &self.routes.chat_workflow,
            TaskType::SuggestionWorkflow => &self.routes.suggestion_workflow,
            TaskType::EventProcessor => &self.routes.event_processor,
        }
    }

    pub async fn publish_event(
        &self,
        event_type: EventType,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        parent_id: Option<String>,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Result<PublishedEvent> {
        let event = Event::new(event_type, entity_type, entity_id, parent_id, data);
        self.events.insert_event(&event).await?;
        debug!(event_id = %event.id, %event_type, %entity_type, "Event persisted");

        let task = QueuedTask::event_processor(&event);
        let queue = self.queue_for(TaskType::EventProcessor).to_string();
        let outcome = match self.queue.publish(&queue, &task).await {
            Ok(()) => {
                info!(event_id = %event.id, task_id = %task.task_id, queue = %queue, "Event enqueued for processing");
                PublishOutcome::Enqueued { queue, task_id: task.task_id }
            }
            Err(e) => {
                warn!(
                    event_id = %event.id,
                    queue = %queue,
                    error = %e,
                    "Enqueue failed, processing event in-process"
                );
                metrics::counter!("tw_publisher_fallback_total").increment(1);
                self.spawn_fallback(EventProcessorPayload::from(&event));
                PublishOutcome::FallbackSpawned
            }
        };
        Ok(PublishedEvent { event, outcome })
    }

    /// Enqueue a workflow task. No in-process fallback: the error is returned.
    pub async fn enqueue_workflow(
        &self,
        message_id: &str,
        session_id: &str,
        suggestion_mode: bool,
    ) -> Result<QueuedTask> {
        let task = QueuedTask::workflow(message_id, session_id, suggestion_mode);
        let queue = self.queue_for(task.task_type);
        self.queue.publish(queue, &task).await?;
        info!(task_id = %task.task_id, task_type = %task.task_type, queue, "Workflow enqueued");
        Ok(task)
    }

    fn spawn_fallback(&self, payload: EventProcessorPayload) {
        let processor = self.processor.clone();
        self.fallbacks.spawn(async move {
            match processor.process(&payload).await {
                Ok(report) => info!(
                    event_id = %payload.event_id,
                    created = report.created.len(),
                    "Fallback event processing finished"
                ),
                Err(e) => error!(
                    event_id = %payload.event_id,
                    error = %e,
                    "Fallback event processing failed; event has no deliveries"
                ),
            }
        });
    }

    pub fn fallbacks_in_flight(&self) -> usize {
        self.fallbacks.len()
    }

    /// Wait for in-process fallbacks to finish. Returns false on timeout.
    pub async fn drain_fallbacks(&self, timeout: Duration) -> bool {
        self.fallbacks.close();
        let drained = tokio::time::timeout(timeout, self.fallbacks.wait()).await.is_ok();
        self.fallbacks.reopen();
        drained
    }
}
