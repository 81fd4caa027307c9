use thiserror::Error;
use tw_common::{DeliveryStatus, InvalidProcessorConfig};
use tw_queue::QueueError;
use tw_store::StoreError;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    InvalidConfig(#[from] InvalidProcessorConfig),

    #[error("Delivery {delivery_id} is terminal ({status})")]
    Terminal { delivery_id: String, status: &'static str },

    #[error("Delivery {delivery_id} expected attempt {expected}, got {attempt_number}")]
    AttemptConflict {
        delivery_id: String,
        expected: u32,
        attempt_number: u32,
    },

    #[error("Delivery {delivery_id} cannot be retried from status {status}")]
    NotRetryable { delivery_id: String, status: &'static str },

    #[error("Delivery {delivery_id} has no attempts remaining")]
    NoAttemptsRemaining { delivery_id: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DeliveryError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn terminal(delivery_id: impl Into<String>, status: DeliveryStatus) -> Self {
        Self::Terminal { delivery_id: delivery_id.into(), status: status.as_str() }
    }

    /// Downstream dependency failures; the caller should retry the surrounding work.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Store(e) => e.is_retryable(),
            DeliveryError::Queue(_) | DeliveryError::Http(_) => true,
            DeliveryError::NotFound { .. }
            | DeliveryError::InvalidConfig(_)
            | DeliveryError::Terminal { .. }
            | DeliveryError::AttemptConflict { .. }
            | DeliveryError::NotRetryable { .. }
            | DeliveryError::NoAttemptsRemaining { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DeliveryError>;
