use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::InProgress => "in_progress",
            DeliveryStatus::Completed => "completed",
            DeliveryStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Failure => "failure",
        }
    }
}

/// One attempt-tracked obligation to deliver one event to one processor.
///
/// Invariants: `current_attempts <= max_attempts`; `Failed` only once
/// `current_attempts == max_attempts`; `Completed` is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: String,
    pub event_id: String,
    pub processor_config_id: String,
    pub status: DeliveryStatus,
    pub max_attempts: u32,
    pub current_attempts: u32,
    pub request_payload_snapshot: serde_json::Value,
    /// Set while a dispatcher owns the delivery (`InProgress`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    pub fn new(
        event_id: impl Into<String>,
        processor_config_id: impl Into<String>,
        request_payload_snapshot: serde_json::Value,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: crate::new_id(),
            event_id: event_id.into(),
            processor_config_id: processor_config_id.into(),
            status: DeliveryStatus::Pending,
            max_attempts,
            current_attempts: 0,
            request_payload_snapshot,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.current_attempts)
    }

    /// No further attempt may be recorded.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            DeliveryStatus::Completed => true,
            DeliveryStatus::Failed => self.attempts_remaining() == 0,
            DeliveryStatus::Pending | DeliveryStatus::InProgress => self.attempts_remaining() == 0,
        }
    }

    /// Belongs on the retry queue polled by the pending sweep.
    pub fn is_retry_eligible(&self) -> bool {
        match self.status {
            DeliveryStatus::Pending => true,
            DeliveryStatus::Failed => self.attempts_remaining() > 0,
            DeliveryStatus::InProgress | DeliveryStatus::Completed => false,
        }
    }

    /// Status after one more attempt with the given outcome.
    pub fn status_after(&self, outcome: AttemptOutcome) -> DeliveryStatus {
        match outcome {
            AttemptOutcome::Success => DeliveryStatus::Completed,
            AttemptOutcome::Failure if self.current_attempts + 1 < self.max_attempts => DeliveryStatus::Pending,
            AttemptOutcome::Failure => DeliveryStatus::Failed,
        }
    }
}

/// One concrete try toward fulfilling a delivery. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: String,
    pub delivery_id: String,
    /// 1-based, strictly increasing per delivery
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub request_payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(max: u32, current: u32, status: DeliveryStatus) -> Delivery {
        let mut d = Delivery::new("e1", "c1", serde_json::json!({}), max);
        d.current_attempts = current;
        d.status = status;
        d
    }

    #[test]
    fn test_new_delivery_is_pending() {
        let d = Delivery::new("e1", "c1", serde_json::json!({"a": 1}), Delivery::DEFAULT_MAX_ATTEMPTS);
        assert_eq!(d.status, DeliveryStatus::Pending);
        assert_eq!(d.current_attempts, 0);
        assert_eq!(d.max_attempts, 3);
        assert!(d.is_retry_eligible());
        assert!(!d.is_terminal());
    }

    #[test]
    fn test_status_after_failures() {
        assert_eq!(delivery(3, 0, DeliveryStatus::InProgress).status_after(AttemptOutcome::Failure), DeliveryStatus::Pending);
        assert_eq!(delivery(3, 1, DeliveryStatus::InProgress).status_after(AttemptOutcome::Failure), DeliveryStatus::Pending);
        assert_eq!(delivery(3, 2, DeliveryStatus::InProgress).status_after(AttemptOutcome::Failure), DeliveryStatus::Failed);
        assert_eq!(delivery(3, 2, DeliveryStatus::InProgress).status_after(AttemptOutcome::Success), DeliveryStatus::Completed);
    }

    #[test]
    fn test_terminal_states() {
        assert!(delivery(3, 1, DeliveryStatus::Completed).is_terminal());
        assert!(delivery(3, 3, DeliveryStatus::Failed).is_terminal());
        assert!(!delivery(3, 1, DeliveryStatus::Failed).is_terminal());
    }

    #[test]
    fn test_failed_with_attempts_left_is_swept() {
        assert!(delivery(3, 1, DeliveryStatus::Failed).is_retry_eligible());
        assert!(!delivery(3, 3, DeliveryStatus::Failed).is_retry_eligible());
        assert!(!delivery(3, 1, DeliveryStatus::InProgress).is_retry_eligible());
    }
}
