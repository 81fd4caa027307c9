//! Broker publish sender
//!
//! Opens a short-lived AMQP connection to the configured endpoint, optionally declares the
//! target queue, and publishes. Publisher confirms are not requested; success means the
//! publish frame was written without error.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable, LongString};
use lapin::{BasicProperties, Connection, ConnectionProperties};
use thiserror::Error;
use tracing::{debug, warn};
use tw_common::BrokerPublishConfig;

use crate::dispatcher::DispatchOutcome;

#[async_trait]
pub trait BrokerSender: Send + Sync {
    async fn publish(&self, config: &BrokerPublishConfig, payload: &serde_json::Value) -> DispatchOutcome;
}

#[derive(Debug, Error)]
enum PublishError {
    #[error("connection to {0} timed out")]
    ConnectTimeout(String),

    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Amqp(#[from] lapin::Error),
}

/// Message properties for a broker delivery: JSON content type, a `timestamp` header in
/// RFC 3339 form, and a persistent delivery mode when the target is durable.
fn publish_properties(config: &BrokerPublishConfig, now: DateTime<Utc>) -> BasicProperties {
    let mut headers = FieldTable::default();
    headers.insert(
        "timestamp".into(),
        AMQPValue::LongString(LongString::from(now.to_rfc3339())),
    );
    BasicProperties::default()
        .with_content_type("application/json".into())
        .with_timestamp(now.timestamp().max(0) as u64)
        .with_delivery_mode(if config.durable { 2 } else { 1 })
        .with_headers(headers)
}

pub struct AmqpSender {
    connect_timeout: Duration,
}

impl AmqpSender {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn try_publish(
        &self,
        config: &BrokerPublishConfig,
        payload: &serde_json::Value,
    ) -> Result<(), PublishError> {
        let body = serde_json::to_vec(payload)?;
        let endpoint = format!("{}:{}", config.host, config.port);

        let connection = tokio::time::timeout(
            self.connect_timeout,
            Connection::connect(&config.amqp_uri(), ConnectionProperties::default()),
        )
        .await
        .map_err(|_| PublishError::ConnectTimeout(endpoint))??;
        let channel = connection.create_channel().await?;

        if config.declare_queue {
            if let Some(queue) = &config.queue {
                channel
                    .queue_declare(
                        queue,
                        QueueDeclareOptions { durable: config.durable, ..Default::default() },
                        FieldTable::default(),
                    )
                    .await?;
            }
        }

        let properties = publish_properties(config, Utc::now());

        channel
            .basic_publish(
                &config.exchange,
                config.effective_routing_key(),
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await?;

        if let Err(e) = channel.close(200, "published").await {
            debug!(error = %e, "Channel close after publish failed");
        }
        if let Err(e) = connection.close(200, "published").await {
            debug!(error = %e, "Connection close after publish failed");
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerSender for AmqpSender {
    async fn publish(&self, config: &BrokerPublishConfig, payload: &serde_json::Value) -> DispatchOutcome {
        match self.try_publish(config, payload).await {
            Ok(()) => {
                debug!(
                    host = %config.host,
                    exchange = %config.exchange,
                    routing_key = config.effective_routing_key(),
                    "Broker publish succeeded"
                );
                DispatchOutcome::success()
            }
            Err(e) => {
                warn!(host = %config.host, exchange = %config.exchange, error = %e, "Broker publish failed");
                DispatchOutcome::failure(e.to_string())
            }
        }
    }
}
