//! Event processing
//!
//! Body of the `event_processor` task: resolve the tenant, match processor configs, and
//! create one pending delivery per matching config. Runs in the worker and in the
//! publisher's in-process fallback.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use tw_common::{Delivery, Event, EventProcessorPayload};
use tw_store::{EventRepository, StoreError};

use crate::error::{DeliveryError, Result};
use crate::registry::ProcessorRegistry;
use crate::runner::DeliveryRunner;
use crate::tenant::TenantResolver;
use crate::tracker::DeliveryTracker;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessReport {
    pub tenant_id: Option<String>,
    /// Deliveries created by this run
    pub created: Vec<Delivery>,
    /// Configs that already had a delivery for this event
    pub already_delivered: usize,
}

pub struct EventProcessor {
    events: Arc<dyn EventRepository>,
    resolver: TenantResolver,
    registry: Arc<ProcessorRegistry>,
    tracker: Arc<DeliveryTracker>,
    runner: Option<Arc<DeliveryRunner>>,
}

impl EventProcessor {
    pub fn new(
        events: Arc<dyn EventRepository>,
        resolver: TenantResolver,
        registry: Arc<ProcessorRegistry>,
        tracker: Arc<DeliveryTracker>,
    ) -> Self {
        Self { events, resolver, registry, tracker, runner: None }
    }

    /// Dispatch each new delivery right after it is created.
    pub fn with_dispatch_on_create(mut self, runner: Arc<DeliveryRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub async fn process(&self, payload: &EventProcessorPayload) -> Result<ProcessReport> {
        let Some(tenant_id) = self.resolver.resolve(payload.entity_type, &payload.entity_id).await? else {
            return Ok(ProcessReport::default());
        };

        let configs = self
            .registry
            .match_configs(&tenant_id, payload.event_type, payload.entity_type)
            .await?;
        let mut report = ProcessReport { tenant_id: Some(tenant_id.clone()), ..Default::default() };
        if configs.is_empty() {
            return Ok(report);
        }

        let snapshot = self.snapshot(payload, &tenant_id).await?;

        // A redelivered task must not fan out twice.
        let existing: HashSet<String> = self
            .tracker
            .list_for_event(&payload.event_id)
            .await?
            .into_iter()
            .map(|d| d.processor_config_id)
            .collect();

        for config in configs {
            if existing.contains(&config.id) {
                report.already_delivered += 1;
                continue;
            }
            match self
                .tracker
                .create_delivery(&payload.event_id, &config.id, snapshot.clone(), None)
                .await
            {
                Ok(delivery) => report.created.push(delivery),
                // Lost the race with a concurrent run for the same event.
                Err(DeliveryError::Store(StoreError::Duplicate { .. })) => report.already_delivered += 1,
                Err(e) => return Err(e),
            }
        }

        info!(
            event_id = %payload.event_id,
            tenant_id = %tenant_id,
            created = report.created.len(),
            already_delivered = report.already_delivered,
            "Event processed"
        );

        if let Some(runner) = &self.runner {
            for delivery in &report.created {
                if let Err(e) = runner.dispatch_delivery(&delivery.id).await {
                    warn!(delivery_id = %delivery.id, error = %e, "Immediate dispatch failed, left for sweep");
                }
            }
        }
        Ok(report)
    }

    async fn snapshot(&self, payload: &EventProcessorPayload, tenant_id: &str) -> Result<serde_json::Value> {
        let event = match self.events.get_event(&payload.event_id).await? {
            Some(event) => event,
            None => {
                warn!(event_id = %payload.event_id, "Event not in store, using task payload");
                let mut event = Event::new(
                    payload.event_type,
                    payload.entity_type,
                    payload.entity_id.clone(),
                    payload.parent_id.clone(),
                    payload.data.clone(),
                );
                event.id = payload.event_id.clone();
                event
            }
        };
        Ok(event.delivery_payload(tenant_id))
    }
}
