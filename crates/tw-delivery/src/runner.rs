//! Delivery runner
//!
//! The single dispatch entry point. Both the per-delivery trigger and the pending sweep go
//! through [`DeliveryRunner::dispatch_delivery`], and nothing is sent without first winning
//! the claim.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info};
use tw_common::{AttemptOutcome, DeliveryAttempt};
use tw_store::ProcessorConfigRepository;

use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::Result;
use crate::tracker::{AttemptRecord, DeliveryTracker};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub examined: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Claimed elsewhere or no longer eligible
    pub skipped: usize,
    pub errors: usize,
}

pub struct DeliveryRunner {
    tracker: Arc<DeliveryTracker>,
    configs: Arc<dyn ProcessorConfigRepository>,
    dispatcher: Arc<dyn Dispatcher>,
    dispatch_timeout: Duration,
    sweep_concurrency: usize,
}

impl DeliveryRunner {
    pub fn new(
        tracker: Arc<DeliveryTracker>,
        configs: Arc<dyn ProcessorConfigRepository>,
        dispatcher: Arc<dyn Dispatcher>,
        dispatch_timeout: Duration,
        sweep_concurrency: usize,
    ) -> Self {
        Self {
            tracker,
            configs,
            dispatcher,
            dispatch_timeout,
            sweep_concurrency: sweep_concurrency.max(1),
        }
    }

    pub fn tracker(&self) -> &Arc<DeliveryTracker> {
        &self.tracker
    }

    /// Claim, dispatch the stored payload snapshot, record the attempt.
    ///
    /// `Ok(None)` means the delivery could not be claimed and nothing was sent.
    pub async fn dispatch_delivery(&self, delivery_id: &str) -> Result<Option<DeliveryAttempt>> {
        let Some(delivery) = self.tracker.claim(delivery_id).await? else {
            return Ok(None);
        };
        let started_at = chrono::Utc::now();

        let outcome = match self.configs.get_config(&delivery.processor_config_id).await? {
            Some(config) if config.is_active => {
                match tokio::time::timeout(
                    self.dispatch_timeout,
                    self.dispatcher
                        .dispatch(&config.processor, &delivery.request_payload_snapshot),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => DispatchOutcome::failure(format!(
                        "dispatch timed out after {}s",
                        self.dispatch_timeout.as_secs()
                    )),
                }
            }
            Some(_) => DispatchOutcome::failure("processor config is inactive"),
            None => DispatchOutcome::failure("processor config no longer exists"),
        };

        let outcome_kind = if outcome.success {
            AttemptOutcome::Success
        } else {
            AttemptOutcome::Failure
        };
        let mut record = AttemptRecord::new(&delivery, outcome_kind);
        record.started_at = started_at;
        record.status_code = outcome.status_code;
        record.response_payload = outcome.response_body;
        record.error_message = outcome.error;

        let attempt = self.tracker.record_attempt(record).await?;
        Ok(Some(attempt))
    }

    /// Dispatch up to `limit` retry-eligible deliveries with bounded concurrency.
    pub async fn sweep(&self, limit: usize) -> Result<SweepSummary> {
        let pending = self.tracker.list_pending(limit).await?;
        let mut summary = SweepSummary { examined: pending.len(), ..Default::default() };
        if pending.is_empty() {
            return Ok(summary);
        }

        let results: Vec<(String, Result<Option<DeliveryAttempt>>)> = stream::iter(pending)
            .map(|d| async move {
                let result = self.dispatch_delivery(&d.id).await;
                (d.id, result)
            })
            .buffer_unordered(self.sweep_concurrency)
            .collect()
            .await;

        for (delivery_id, result) in results {
            match result {
                Ok(Some(attempt)) if attempt.outcome == AttemptOutcome::Success => summary.succeeded += 1,
                Ok(Some(_)) => summary.failed += 1,
                Ok(None) => summary.skipped += 1,
                Err(e) => {
                    error!(delivery_id = %delivery_id, error = %e, "Sweep dispatch failed");
                    summary.errors += 1;
                }
            }
        }

        if summary.succeeded + summary.failed + summary.errors > 0 {
            info!(
                examined = summary.examined,
                succeeded = summary.succeeded,
                failed = summary.failed,
                skipped = summary.skipped,
                errors = summary.errors,
                "Pending delivery sweep finished"
            );
        } else {
            debug!(examined = summary.examined, "Pending delivery sweep found nothing to send");
        }
        Ok(summary)
    }
}
