//! Tidewire worker
//!
//! Consumes task queues and runs the task handlers:
//! - [`WorkerPool`]: `concurrency` consumer slots per queue, ack / requeue / discard
//! - [`WorkflowHandler`]: chat replies and suggestions through the AI collaborator
//! - [`EventProcessorHandler`]: delivery fan-out for published events
//! - [`LifecycleTasks`]: delivery sweep, stale-claim release, stats log
//! - [`api::create_router`]: admin endpoints for deliveries and worker stats

pub mod ai;
pub mod api;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod pool;
pub mod stats;
pub mod workflow;

use std::sync::Arc;

use tw_common::TaskType;
use tw_delivery::DeliveryPipeline;
use tw_store::ConversationRepository;

pub use ai::{AiError, GenerateRequest, GeneratedResponse, GenerationMode, HttpResponseGenerator, ResponseGenerator};
pub use api::{create_router, AdminState};
pub use error::{HandlerError, Result};
pub use handler::{EventProcessorHandler, TaskHandler, TaskRouter};
pub use lifecycle::{LifecycleConfig, LifecycleTasks};
pub use pool::{settle_decision, WorkerPool};
pub use stats::{PoolStats, SlotSnapshot};
pub use workflow::{WorkflowHandler, WorkflowOutcome};

/// Router with the workflow handler on both workflow types and the event processor handler.
pub fn build_task_router(
    pipeline: &DeliveryPipeline,
    conversations: Arc<dyn ConversationRepository>,
    generator: Arc<dyn ResponseGenerator>,
    context_window: usize,
) -> TaskRouter {
    let workflow = Arc::new(WorkflowHandler::new(
        conversations,
        generator,
        pipeline.publisher.clone(),
        context_window,
    ));
    TaskRouter::new()
        .register(TaskType::ChatWorkflow, workflow.clone())
        .register(TaskType::SuggestionWorkflow, workflow)
        .register(
            TaskType::EventProcessor,
            Arc::new(EventProcessorHandler::new(pipeline.processor.clone())),
        )
}
