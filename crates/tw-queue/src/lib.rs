//! Tidewire task queue
//!
//! Broker-neutral traits used by the worker pool and the event publisher:
//! - [`QueueBroker`] declares queues and opens one [`QueueConsumer`] per worker slot
//! - [`QueueConsumer`] yields raw messages and settles them with an [`AckNack`]
//! - [`TaskPublisher`] enqueues a [`QueuedTask`] onto a named queue
//!
//! Backends: AMQP via lapin (feature `amqp`) and an in-process [`MemoryBroker`].

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod error;
pub mod memory;

use async_trait::async_trait;
use tw_common::QueuedTask;

#[cfg(feature = "amqp")]
pub use amqp::{AmqpBroker, AmqpConsumer, AmqpPublisher};
pub use error::{QueueError, Result};
pub use memory::{MemoryBroker, Settlement};

/// Final disposition of a consumed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckNack {
    Ack,
    /// `requeue = false` hands the message to the broker's dead-letter handling.
    Nack { requeue: bool },
}

impl AckNack {
    pub const REQUEUE: AckNack = AckNack::Nack { requeue: true };
    pub const DISCARD: AckNack = AckNack::Nack { requeue: false };

    pub fn as_str(&self) -> &'static str {
        match self {
            AckNack::Ack => "acked",
            AckNack::Nack { requeue: true } => "requeued",
            AckNack::Nack { requeue: false } => "discarded",
        }
    }
}

/// A message pulled from a queue, not yet settled.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub redelivered: bool,
}

/// One consumer channel. Owned by a single worker slot; not shared.
#[async_trait]
pub trait QueueConsumer: Send {
    fn queue(&self) -> &str;

    /// Wait for the next message. `None` once the underlying stream has closed.
    async fn receive(&mut self) -> Result<Option<ReceivedMessage>>;

    async fn settle(&mut self, delivery_tag: u64, decision: AckNack) -> Result<()>;
}

#[async_trait]
pub trait QueueBroker: Send + Sync {
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// Open a dedicated channel consuming `queue`, with the broker's prefetch applied.
    async fn consumer(&self, queue: &str, consumer_tag: &str) -> Result<Box<dyn QueueConsumer>>;
}

#[async_trait]
pub trait TaskPublisher: Send + Sync {
    async fn publish(&self, queue: &str, task: &QueuedTask) -> Result<()>;
}
