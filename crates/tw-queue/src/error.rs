use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Broker connection error: {0}")]
    Connection(String),

    #[error("Failed to publish to {queue}: {message}")]
    Publish { queue: String, message: String },

    #[error("Unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[cfg(feature = "amqp")]
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}

impl QueueError {
    pub fn publish(queue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish { queue: queue.into(), message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
