//! MongoDB backend
//!
//! Documents keep their string `id` field; MongoDB assigns its own `_id`.
//! Timestamps are stored in their serde (RFC 3339) form.

use async_trait::async_trait;
use bson::{doc, Document};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::info;
use tw_common::{
    ChatMessage, ChatSession, Delivery, DeliveryAttempt, DeliveryStatus, Event, ProcessorConfig,
};

use crate::error::{Result, StoreError};
use crate::repository::{
    ConversationRepository, DeliveryRepository, EventRepository, ProcessorConfigRepository,
};

pub struct MongoStore {
    events: Collection<Event>,
    configs: Collection<ProcessorConfig>,
    deliveries: Collection<Delivery>,
    attempts: Collection<DeliveryAttempt>,
    sessions: Collection<ChatSession>,
    messages: Collection<ChatMessage>,
}

impl MongoStore {
    pub fn new(db: &Database) -> Self {
        Self {
            events: db.collection("events"),
            configs: db.collection("processor_configs"),
            deliveries: db.collection("deliveries"),
            attempts: db.collection("delivery_attempts"),
            sessions: db.collection("chat_sessions"),
            messages: db.collection("chat_messages"),
        }
    }

    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let store = Self::new(&client.database(database));
        store.ensure_indexes().await?;
        info!(database, "Connected to MongoDB");
        Ok(store)
    }

    pub async fn ensure_indexes(&self) -> Result<()> {
        let unique_id = || {
            IndexModel::builder()
                .keys(doc! { "id": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build()
        };
        self.events.create_index(unique_id()).await?;
        self.configs.create_index(unique_id()).await?;
        self.deliveries.create_index(unique_id()).await?;
        self.sessions.create_index(unique_id()).await?;
        self.messages.create_index(unique_id()).await?;

        self.configs
            .create_index(IndexModel::builder().keys(doc! { "tenant_id": 1, "is_active": 1 }).build())
            .await?;
        self.deliveries
            .create_index(IndexModel::builder().keys(doc! { "status": 1, "created_at": 1 }).build())
            .await?;
        self.deliveries
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "event_id": 1, "processor_config_id": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;
        self.attempts
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "delivery_id": 1, "attempt_number": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;
        self.messages
            .create_index(IndexModel::builder().keys(doc! { "session_id": 1, "created_at": 1 }).build())
            .await?;
        Ok(())
    }
}

const DUPLICATE_KEY: i32 = 11000;

fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    matches!(e.kind.as_ref(), ErrorKind::Write(WriteFailure::WriteError(w)) if w.code == DUPLICATE_KEY)
}

fn retry_eligible_filter() -> Document {
    doc! {
        "$or": [
            { "status": DeliveryStatus::Pending.as_str() },
            {
                "status": DeliveryStatus::Failed.as_str(),
                "$expr": { "$lt": ["$current_attempts", "$max_attempts"] }
            }
        ]
    }
}

#[async_trait]
impl EventRepository for MongoStore {
    async fn insert_event(&self, event: &Event) -> Result<()> {
        self.events.insert_one(event).await?;
        Ok(())
    }

    async fn get_event(&self, id: &str) -> Result<Option<Event>> {
        Ok(self.events.find_one(doc! { "id": id }).await?)
    }
}

#[async_trait]
impl ProcessorConfigRepository for MongoStore {
    async fn insert_config(&self, config: &ProcessorConfig) -> Result<()> {
        self.configs.insert_one(config).await?;
        Ok(())
    }

    async fn update_config(&self, config: &ProcessorConfig) -> Result<()> {
        let result = self.configs.replace_one(doc! { "id": &config.id }, config).await?;
        if result.matched_count == 0 {
            return Err(StoreError::not_found("processor_config", &config.id));
        }
        Ok(())
    }

    async fn get_config(&self, id: &str) -> Result<Option<ProcessorConfig>> {
        Ok(self.configs.find_one(doc! { "id": id }).await?)
    }

    async fn delete_config(&self, id: &str) -> Result<bool> {
        let result = self.configs.delete_one(doc! { "id": id }).await?;
        Ok(result.deleted_count > 0)
    }

    async fn find_active_by_tenant(&self, tenant_id: &str) -> Result<Vec<ProcessorConfig>> {
        let cursor = self
            .configs
            .find(doc! { "tenant_id": tenant_id, "is_active": true })
            .sort(doc! { "created_at": 1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }
}

#[async_trait]
impl DeliveryRepository for MongoStore {
    async fn insert_delivery(&self, delivery: &Delivery) -> Result<()> {
        match self.deliveries.insert_one(delivery).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(StoreError::duplicate("delivery", &delivery.id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_delivery(&self, id: &str) -> Result<Option<Delivery>> {
        Ok(self.deliveries.find_one(doc! { "id": id }).await?)
    }

    async fn claim_delivery(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Delivery>> {
        let mut filter = retry_eligible_filter();
        filter.insert("id", id);
        let now = bson::to_bson(&now)?;
        let update = doc! {
            "$set": {
                "status": DeliveryStatus::InProgress.as_str(),
                "claimed_at": now.clone(),
                "updated_at": now,
            }
        };
        Ok(self
            .deliveries
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await?)
    }

    async fn apply_attempt(
        &self,
        id: &str,
        expected_attempts: u32,
        status: DeliveryStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>> {
        let expected = i64::from(expected_attempts);
        let filter = doc! {
            "id": id,
            "current_attempts": expected,
            "status": { "$ne": DeliveryStatus::Completed.as_str() },
            "max_attempts": { "$gt": expected },
        };
        let update = doc! {
            "$set": {
                "current_attempts": expected + 1,
                "status": status.as_str(),
                "updated_at": bson::to_bson(&now)?,
            },
            "$unset": { "claimed_at": "" },
        };
        Ok(self
            .deliveries
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await?)
    }

    async fn reopen_failed(
        &self,
        id: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>> {
        let filter = doc! { "id": id, "status": DeliveryStatus::Failed.as_str() };
        let update = doc! {
            "$set": {
                "status": DeliveryStatus::Pending.as_str(),
                "max_attempts": i64::from(max_attempts),
                "updated_at": bson::to_bson(&now)?,
            }
        };
        Ok(self
            .deliveries
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await?)
    }

    async fn release_stale_claims(&self, claimed_before: DateTime<Utc>) -> Result<u64> {
        let cursor = self
            .deliveries
            .find(doc! { "status": DeliveryStatus::InProgress.as_str() })
            .await?;
        let claimed: Vec<Delivery> = cursor.try_collect().await?;

        let mut released = 0;
        for delivery in claimed {
            if delivery.claimed_at.map_or(false, |at| at >= claimed_before) {
                continue;
            }
            let mut filter = doc! {
                "id": &delivery.id,
                "status": DeliveryStatus::InProgress.as_str(),
            };
            match delivery.claimed_at {
                Some(at) => filter.insert("claimed_at", bson::to_bson(&at)?),
                None => filter.insert("claimed_at", doc! { "$exists": false }),
            };
            let update = doc! {
                "$set": {
                    "status": DeliveryStatus::Pending.as_str(),
                    "updated_at": bson::to_bson(&Utc::now())?,
                },
                "$unset": { "claimed_at": "" },
            };
            let result = self.deliveries.update_one(filter, update).await?;
            released += result.modified_count;
        }
        Ok(released)
    }

    async fn list_retry_eligible(&self, limit: usize) -> Result<Vec<Delivery>> {
        let cursor = self
            .deliveries
            .find(retry_eligible_filter())
            .sort(doc! { "created_at": 1 })
            .limit(limit as i64)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn list_by_status(&self, status: DeliveryStatus, limit: usize) -> Result<Vec<Delivery>> {
        let cursor = self
            .deliveries
            .find(doc! { "status": status.as_str() })
            .sort(doc! { "created_at": 1 })
            .limit(limit as i64)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn list_by_event(&self, event_id: &str) -> Result<Vec<Delivery>> {
        let cursor = self
            .deliveries
            .find(doc! { "event_id": event_id })
            .sort(doc! { "created_at": 1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
        self.attempts.insert_one(attempt).await?;
        Ok(())
    }

    async fn list_attempts(&self, delivery_id: &str) -> Result<Vec<DeliveryAttempt>> {
        let cursor = self
            .attempts
            .find(doc! { "delivery_id": delivery_id })
            .sort(doc! { "attempt_number": 1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }
}

#[async_trait]
impl ConversationRepository for MongoStore {
    async fn insert_session(&self, session: &ChatSession) -> Result<()> {
        self.sessions.insert_one(session).await?;
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>> {
        Ok(self.sessions.find_one(doc! { "id": id }).await?)
    }

    async fn mark_handover(&self, session_id: &str) -> Result<bool> {
        let result = self
            .sessions
            .update_one(
                doc! { "id": session_id, "handover_requested": { "$ne": true } },
                doc! { "$set": { "handover_requested": true, "updated_at": bson::to_bson(&Utc::now())? } },
            )
            .await?;
        if result.modified_count > 0 {
            return Ok(true);
        }
        match self.get_session(session_id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::not_found("chat_session", session_id)),
        }
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<()> {
        self.messages.insert_one(message).await?;
        Ok(())
    }

    async fn get_message(&self, id: &str) -> Result<Option<ChatMessage>> {
        Ok(self.messages.find_one(doc! { "id": id }).await?)
    }

    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let cursor = self
            .messages
            .find(doc! { "session_id": session_id })
            .sort(doc! { "created_at": -1 })
            .limit(limit as i64)
            .await?;
        let mut messages: Vec<ChatMessage> = cursor.try_collect().await?;
        messages.reverse();
        Ok(messages)
    }
}
