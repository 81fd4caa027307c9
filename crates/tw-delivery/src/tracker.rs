//! Delivery Tracker
//!
//! Owns the delivery state machine:
//!
//! ```text
//! pending ──claim──▶ in_progress ──success──────────────▶ completed
//!    ▲                    │
//!    └──failure, budget───┤
//!                         └──failure, budget spent──────▶ failed ──retry──▶ pending
//! ```
//!
//! Attempt recording is one conditional write on `(current_attempts, status)`; a stale or
//! duplicate attempt loses the race and is reported as a conflict.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use tw_common::{AttemptOutcome, Delivery, DeliveryAttempt, DeliveryStatus};
use tw_store::DeliveryRepository;

use crate::error::{DeliveryError, Result};

/// Input to [`DeliveryTracker::record_attempt`].
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub delivery_id: String,
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub request_payload: serde_json::Value,
    pub response_payload: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn new(delivery: &Delivery, outcome: AttemptOutcome) -> Self {
        Self {
            delivery_id: delivery.id.clone(),
            attempt_number: delivery.current_attempts + 1,
            outcome,
            status_code: None,
            error_message: None,
            request_payload: delivery.request_payload_snapshot.clone(),
            response_payload: None,
            started_at: Utc::now(),
        }
    }
}

pub struct DeliveryTracker {
    deliveries: Arc<dyn DeliveryRepository>,
    default_max_attempts: u32,
}

impl DeliveryTracker {
    pub fn new(deliveries: Arc<dyn DeliveryRepository>, default_max_attempts: u32) -> Self {
        Self { deliveries, default_max_attempts }
    }

    pub async fn create_delivery(
        &self,
        event_id: &str,
        config_id: &str,
        payload: serde_json::Value,
        max_attempts: Option<u32>,
    ) -> Result<Delivery> {
        let max_attempts = max_attempts.unwrap_or(self.default_max_attempts).max(1);
        let delivery = Delivery::new(event_id, config_id, payload, max_attempts);
        self.deliveries.insert_delivery(&delivery).await?;
        info!(
            delivery_id = %delivery.id,
            event_id,
            config_id,
            max_attempts,
            "Delivery created"
        );
        Ok(delivery)
    }

    pub async fn get(&self, id: &str) -> Result<Delivery> {
        self.deliveries
            .get_delivery(id)
            .await?
            .ok_or_else(|| DeliveryError::not_found("delivery", id))
    }

    /// Exclusive gate before dispatch. `None` if another dispatcher holds the delivery
    /// or it is no longer eligible.
    pub async fn claim(&self, id: &str) -> Result<Option<Delivery>> {
        let claimed = self.deliveries.claim_delivery(id, Utc::now()).await?;
        match &claimed {
            Some(d) => debug!(delivery_id = id, attempt = d.current_attempts + 1, "Delivery claimed"),
            None => debug!(delivery_id = id, "Delivery not claimable"),
        }
        Ok(claimed)
    }

    pub async fn record_attempt(&self, record: AttemptRecord) -> Result<DeliveryAttempt> {
        let delivery = self.get(&record.delivery_id).await?;
        Self::check_attempt(&delivery, record.attempt_number)?;

        let status = delivery.status_after(record.outcome);
        let updated = self
            .deliveries
            .apply_attempt(&delivery.id, delivery.current_attempts, status, Utc::now())
            .await?;
        if updated.is_none() {
            // Lost a race; report against the current state.
            let current = self.get(&delivery.id).await?;
            Self::check_attempt(&current, record.attempt_number)?;
            return Err(DeliveryError::AttemptConflict {
                delivery_id: delivery.id,
                expected: current.current_attempts + 1,
                attempt_number: record.attempt_number,
            });
        }

        let attempt = DeliveryAttempt {
            id: tw_common::new_id(),
            delivery_id: record.delivery_id,
            attempt_number: record.attempt_number,
            outcome: record.outcome,
            status_code: record.status_code,
            request_payload: record.request_payload,
            response_payload: record.response_payload,
            error_message: record.error_message,
            started_at: record.started_at,
            completed_at: Some(Utc::now()),
        };
        self.deliveries.insert_attempt(&attempt).await?;

        metrics::counter!("tw_delivery_attempts_total", "outcome" => attempt.outcome.as_str())
            .increment(1);
        match status {
            DeliveryStatus::Failed => warn!(
                delivery_id = %attempt.delivery_id,
                attempt = attempt.attempt_number,
                error = ?attempt.error_message,
                "Delivery failed permanently"
            ),
            _ => info!(
                delivery_id = %attempt.delivery_id,
                attempt = attempt.attempt_number,
                outcome = attempt.outcome.as_str(),
                status = status.as_str(),
                "Delivery attempt recorded"
            ),
        }
        Ok(attempt)
    }

    fn check_attempt(delivery: &Delivery, attempt_number: u32) -> Result<()> {
        if delivery.is_terminal() {
            return Err(DeliveryError::terminal(&delivery.id, delivery.status));
        }
        let expected = delivery.current_attempts + 1;
        if attempt_number != expected {
            return Err(DeliveryError::AttemptConflict {
                delivery_id: delivery.id.clone(),
                expected,
                attempt_number,
            });
        }
        Ok(())
    }

    /// The retry queue: `pending`, plus `failed` with attempts left.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<Delivery>> {
        Ok(self.deliveries.list_retry_eligible(limit).await?)
    }

    pub async fn list_by_status(&self, status: DeliveryStatus, limit: usize) -> Result<Vec<Delivery>> {
        Ok(self.deliveries.list_by_status(status, limit).await?)
    }

    pub async fn list_for_event(&self, event_id: &str) -> Result<Vec<Delivery>> {
        Ok(self.deliveries.list_by_event(event_id).await?)
    }

    pub async fn list_attempts(&self, delivery_id: &str) -> Result<Vec<DeliveryAttempt>> {
        Ok(self.deliveries.list_attempts(delivery_id).await?)
    }

    /// Move a failed delivery back to `pending`. `additional_attempts` raises the budget
    /// first; with zero the delivery must still have attempts left.
    pub async fn retry_failed(&self, id: &str, additional_attempts: u32) -> Result<Delivery> {
        let delivery = self.get(id).await?;
        if delivery.status != DeliveryStatus::Failed {
            return Err(DeliveryError::NotRetryable {
                delivery_id: delivery.id,
                status: delivery.status.as_str(),
            });
        }
        let max_attempts = delivery.max_attempts.saturating_add(additional_attempts);
        if delivery.current_attempts >= max_attempts {
            return Err(DeliveryError::NoAttemptsRemaining { delivery_id: delivery.id });
        }

        let reopened = self
            .deliveries
            .reopen_failed(id, max_attempts, Utc::now())
            .await?
            .ok_or_else(|| DeliveryError::NotRetryable {
                delivery_id: id.to_string(),
                status: DeliveryStatus::Pending.as_str(),
            })?;
        info!(
            delivery_id = id,
            current_attempts = reopened.current_attempts,
            max_attempts,
            "Failed delivery reopened"
        );
        Ok(reopened)
    }

    /// Return deliveries whose claim is older than `claim_timeout` to `pending`.
    pub async fn release_stale(&self, claim_timeout: Duration) -> Result<u64> {
        let cutoff = chrono::Duration::from_std(claim_timeout)
            .ok()
            .and_then(|timeout| Utc::now().checked_sub_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let released = self.deliveries.release_stale_claims(cutoff).await?;
        if released > 0 {
            warn!(released, "Released stale delivery claims");
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tw_store::MemoryStore;

    fn tracker() -> DeliveryTracker {
        DeliveryTracker::new(Arc::new(MemoryStore::new()), Delivery::DEFAULT_MAX_ATTEMPTS)
    }

    async fn fail(tracker: &DeliveryTracker, id: &str, n: u32) -> Result<DeliveryAttempt> {
        let mut record = AttemptRecord::new(&tracker.get(id).await?, AttemptOutcome::Failure);
        record.attempt_number = n;
        record.status_code = Some(500);
        tracker.record_attempt(record).await
    }

    #[tokio::test]
    async fn test_create_uses_default_budget() {
        let tracker = tracker();
        let d = tracker.create_delivery("e1", "c1", serde_json::json!({}), None).await.unwrap();
        assert_eq!(d.max_attempts, 3);
        assert_eq!(d.status, DeliveryStatus::Pending);
    }

    #[tokio::test]
    async fn test_out_of_order_attempt_rejected() {
        let tracker = tracker();
        let d = tracker.create_delivery("e1", "c1", serde_json::json!({}), None).await.unwrap();

        let err = fail(&tracker, &d.id, 2).await.unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::AttemptConflict { expected: 1, attempt_number: 2, .. }
        ));
        assert_eq!(tracker.get(&d.id).await.unwrap().current_attempts, 0);
    }

    #[tokio::test]
    async fn test_retry_failed_without_budget_is_refused() {
        let tracker = tracker();
        let d = tracker.create_delivery("e1", "c1", serde_json::json!({}), Some(1)).await.unwrap();
        fail(&tracker, &d.id, 1).await.unwrap();

        let err = tracker.retry_failed(&d.id, 0).await.unwrap_err();
        assert!(matches!(err, DeliveryError::NoAttemptsRemaining { .. }));

        let reopened = tracker.retry_failed(&d.id, 2).await.unwrap();
        assert_eq!(reopened.status, DeliveryStatus::Pending);
        assert_eq!(reopened.max_attempts, 3);
        assert_eq!(reopened.current_attempts, 1);

        let attempt = fail(&tracker, &d.id, 2).await.unwrap();
        assert_eq!(attempt.attempt_number, 2);
    }

    #[tokio::test]
    async fn test_retry_pending_is_not_retryable() {
        let tracker = tracker();
        let d = tracker.create_delivery("e1", "c1", serde_json::json!({}), None).await.unwrap();
        assert!(matches!(
            tracker.retry_failed(&d.id, 0).await,
            Err(DeliveryError::NotRetryable { .. })
        ));
    }

    #[tokio::test]
    async fn test_release_stale_zero_timeout_releases_claims() {
        let tracker = tracker();
        let d = tracker.create_delivery("e1", "c1", serde_json::json!({}), None).await.unwrap();
        tracker.claim(&d.id).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(tracker.release_stale(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(tracker.get(&d.id).await.unwrap().status, DeliveryStatus::Pending);
    }
}
