use std::sync::Arc;

use tw_config::{DeliveryConfig, TaskRoutes};
use tw_queue::TaskPublisher;
use tw_store::Store;

use crate::dispatcher::Dispatcher;
use crate::processing::EventProcessor;
use crate::publisher::EventPublisher;
use crate::registry::ProcessorRegistry;
use crate::runner::DeliveryRunner;
use crate::tenant::TenantResolver;
use crate::tracker::DeliveryTracker;

/// The delivery components wired against one store.
#[derive(Clone)]
pub struct DeliveryPipeline {
    pub registry: Arc<ProcessorRegistry>,
    pub tracker: Arc<DeliveryTracker>,
    pub runner: Arc<DeliveryRunner>,
    pub processor: Arc<EventProcessor>,
    pub publisher: Arc<EventPublisher>,
}

impl DeliveryPipeline {
    pub fn build<S>(
        store: Arc<S>,
        queue: Arc<dyn TaskPublisher>,
        dispatcher: Arc<dyn Dispatcher>,
        config: &DeliveryConfig,
        routes: TaskRoutes,
    ) -> Self
    where
        S: Store + 'static,
    {
        let registry = Arc::new(ProcessorRegistry::new(store.clone()));
        let tracker = Arc::new(DeliveryTracker::new(store.clone(), config.default_max_attempts));
        let runner = Arc::new(DeliveryRunner::new(
            tracker.clone(),
            store.clone(),
            dispatcher,
            config.dispatch_timeout(),
            config.sweep_concurrency,
        ));

        let mut processor = EventProcessor::new(
            store.clone(),
            TenantResolver::new(store.clone()),
            registry.clone(),
            tracker.clone(),
        );
        if config.dispatch_on_create {
            processor = processor.with_dispatch_on_create(runner.clone());
        }
        let processor = Arc::new(processor);

        let publisher = Arc::new(EventPublisher::new(store, queue, routes, processor.clone()));

        Self { registry, tracker, runner, processor, publisher }
    }
}
