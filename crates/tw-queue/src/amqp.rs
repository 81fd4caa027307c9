//! AMQP backend (lapin)
//!
//! One connection per process. Each consumer slot and the publisher get their own channel.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tracing::{debug, info};
use tw_common::QueuedTask;

use crate::error::{QueueError, Result};
use crate::{AckNack, QueueBroker, QueueConsumer, ReceivedMessage, TaskPublisher};

/// Persistent delivery mode
const PERSISTENT: u8 = 2;

pub struct AmqpBroker {
    connection: Connection,
    prefetch: u16,
    durable: bool,
}

impl AmqpBroker {
    pub async fn connect(url: &str, prefetch: u16, durable: bool) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        info!(prefetch, durable, "Connected to AMQP broker");
        Ok(Self { connection, prefetch, durable })
    }

    /// Publisher on its own channel of this connection.
    pub async fn publisher(&self) -> Result<AmqpPublisher> {
        let channel = self.connection.create_channel().await?;
        Ok(AmqpPublisher { channel })
    }

    pub async fn close(&self) -> Result<()> {
        self.connection.close(200, "shutdown").await?;
        Ok(())
    }

    fn declare_options(&self) -> QueueDeclareOptions {
        QueueDeclareOptions { durable: self.durable, ..Default::default() }
    }
}

#[async_trait]
impl QueueBroker for AmqpBroker {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        let channel = self.connection.create_channel().await?;
        channel
            .queue_declare(queue, self.declare_options(), FieldTable::default())
            .await?;
        channel.close(200, "declared").await?;
        debug!(queue, "Declared queue");
        Ok(())
    }

    async fn consumer(&self, queue: &str, consumer_tag: &str) -> Result<Box<dyn QueueConsumer>> {
        let channel = self.connection.create_channel().await?;
        channel.basic_qos(self.prefetch, BasicQosOptions::default()).await?;
        let consumer = channel
            .basic_consume(queue, consumer_tag, BasicConsumeOptions::default(), FieldTable::default())
            .await?;
        Ok(Box::new(AmqpConsumer {
            queue: queue.to_string(),
            channel,
            consumer,
        }))
    }
}

pub struct AmqpConsumer {
    queue: String,
    channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl QueueConsumer for AmqpConsumer {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn receive(&mut self) -> Result<Option<ReceivedMessage>> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => Ok(Some(ReceivedMessage {
                delivery_tag: delivery.delivery_tag,
                body: delivery.data,
                redelivered: delivery.redelivered,
            })),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    async fn settle(&mut self, delivery_tag: u64, decision: AckNack) -> Result<()> {
        match decision {
            AckNack::Ack => {
                self.channel
                    .basic_ack(delivery_tag, BasicAckOptions::default())
                    .await?
            }
            AckNack::Nack { requeue } => {
                self.channel
                    .basic_nack(delivery_tag, BasicNackOptions { multiple: false, requeue })
                    .await?
            }
        }
        Ok(())
    }
}

pub struct AmqpPublisher {
    channel: Channel,
}

#[async_trait]
impl TaskPublisher for AmqpPublisher {
    async fn publish(&self, queue: &str, task: &QueuedTask) -> Result<()> {
        let body = task.encode()?;
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(PERSISTENT)
            .with_message_id(task.task_id.clone().into());

        self.channel
            .basic_publish("", queue, BasicPublishOptions::default(), &body, properties)
            .await
            .map_err(|e| QueueError::publish(queue, e.to_string()))?
            .await
            .map_err(|e| QueueError::publish(queue, e.to_string()))?;

        debug!(queue, task_id = %task.task_id, task_type = %task.task_type, "Task enqueued");
        Ok(())
    }
}
