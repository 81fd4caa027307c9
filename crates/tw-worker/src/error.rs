use thiserror::Error;
use tw_common::EnvelopeError;
use tw_delivery::DeliveryError;
use tw_store::StoreError;

use crate::ai::AiError;

#[derive(Error, Debug)]
pub enum HandlerError {
    /// The task can never succeed: undecodable envelope, unroutable type, inconsistent payload.
    #[error("Malformed task: {0}")]
    Malformed(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("AI collaborator error: {0}")]
    Ai(#[from] AiError),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, HandlerError::Malformed(_))
    }

    /// Downstream dependency failures (store, queue, AI service) rather than task faults.
    pub fn is_retryable(&self) -> bool {
        match self {
            HandlerError::Store(e) => e.is_retryable(),
            HandlerError::Delivery(e) => e.is_retryable(),
            HandlerError::Ai(e) => e.is_retryable(),
            HandlerError::Malformed(_) | HandlerError::NotFound { .. } | HandlerError::Panicked(_) => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::Malformed(_) => "malformed",
            HandlerError::NotFound { .. } => "not_found",
            HandlerError::Store(_) => "store",
            HandlerError::Delivery(_) => "delivery",
            HandlerError::Ai(_) => "ai",
            HandlerError::Panicked(_) => "panic",
        }
    }
}

impl From<EnvelopeError> for HandlerError {
    fn from(e: EnvelopeError) -> Self {
        HandlerError::Malformed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HandlerError>;
