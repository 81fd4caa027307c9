//! In-memory store
//!
//! Each delivery lives in its own DashMap entry; conditional transitions run while holding
//! the entry's write guard, which gives the same all-or-nothing behaviour as a single
//! MongoDB `find_one_and_update`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tw_common::{
    ChatMessage, ChatSession, Delivery, DeliveryAttempt, DeliveryStatus, Event, ProcessorConfig,
};

use crate::error::{Result, StoreError};
use crate::repository::{
    ConversationRepository, DeliveryRepository, EventRepository, ProcessorConfigRepository,
};

#[derive(Default)]
pub struct MemoryStore {
    events: DashMap<String, Event>,
    configs: DashMap<String, ProcessorConfig>,
    deliveries: DashMap<String, Delivery>,
    /// (event_id, processor_config_id) -> delivery id
    delivery_keys: DashMap<(String, String), String>,
    attempts: DashMap<String, Vec<DeliveryAttempt>>,
    sessions: DashMap<String, ChatSession>,
    messages: DashMap<String, (u64, ChatMessage)>,
    message_seq: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn delivery_count(&self) -> usize {
        self.deliveries.len()
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }

    fn sorted_deliveries<F>(&self, limit: usize, keep: F) -> Vec<Delivery>
    where
        F: Fn(&Delivery) -> bool,
    {
        let mut out: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|d| keep(d.value()))
            .map(|d| d.value().clone())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out.truncate(limit);
        out
    }
}

fn insert_new<T: Clone>(map: &DashMap<String, T>, entity: &'static str, id: &str, value: &T) -> Result<()> {
    match map.entry(id.to_string()) {
        Entry::Occupied(_) => Err(StoreError::duplicate(entity, id)),
        Entry::Vacant(slot) => {
            slot.insert(value.clone());
            Ok(())
        }
    }
}

#[async_trait]
impl EventRepository for MemoryStore {
    async fn insert_event(&self, event: &Event) -> Result<()> {
        self.check()?;
        insert_new(&self.events, "event", &event.id, event)
    }

    async fn get_event(&self, id: &str) -> Result<Option<Event>> {
        self.check()?;
        Ok(self.events.get(id).map(|e| e.clone()))
    }
}

#[async_trait]
impl ProcessorConfigRepository for MemoryStore {
    async fn insert_config(&self, config: &ProcessorConfig) -> Result<()> {
        self.check()?;
        insert_new(&self.configs, "processor_config", &config.id, config)
    }

    async fn update_config(&self, config: &ProcessorConfig) -> Result<()> {
        self.check()?;
        match self.configs.get_mut(&config.id) {
            Some(mut existing) => {
                *existing = config.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("processor_config", &config.id)),
        }
    }

    async fn get_config(&self, id: &str) -> Result<Option<ProcessorConfig>> {
        self.check()?;
        Ok(self.configs.get(id).map(|c| c.clone()))
    }

    async fn delete_config(&self, id: &str) -> Result<bool> {
        self.check()?;
        Ok(self.configs.remove(id).is_some())
    }

    async fn find_active_by_tenant(&self, tenant_id: &str) -> Result<Vec<ProcessorConfig>> {
        self.check()?;
        let mut out: Vec<ProcessorConfig> = self
            .configs
            .iter()
            .filter(|c| c.tenant_id == tenant_id && c.is_active)
            .map(|c| c.value().clone())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }
}

#[async_trait]
impl DeliveryRepository for MemoryStore {
    async fn insert_delivery(&self, delivery: &Delivery) -> Result<()> {
        self.check()?;
        let key = (delivery.event_id.clone(), delivery.processor_config_id.clone());
        match self.delivery_keys.entry(key) {
            Entry::Occupied(existing) => Err(StoreError::duplicate("delivery", existing.get().clone())),
            Entry::Vacant(slot) => {
                insert_new(&self.deliveries, "delivery", &delivery.id, delivery)?;
                slot.insert(delivery.id.clone());
                Ok(())
            }
        }
    }

    async fn get_delivery(&self, id: &str) -> Result<Option<Delivery>> {
        self.check()?;
        Ok(self.deliveries.get(id).map(|d| d.clone()))
    }

    async fn claim_delivery(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Delivery>> {
        self.check()?;
        let Some(mut delivery) = self.deliveries.get_mut(id) else {
            return Ok(None);
        };
        if !delivery.is_retry_eligible() {
            return Ok(None);
        }
        delivery.status = DeliveryStatus::InProgress;
        delivery.claimed_at = Some(now);
        delivery.updated_at = now;
        Ok(Some(delivery.clone()))
    }

    async fn apply_attempt(
        &self,
        id: &str,
        expected_attempts: u32,
        status: DeliveryStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>> {
        self.check()?;
        let Some(mut delivery) = self.deliveries.get_mut(id) else {
            return Ok(None);
        };
        if delivery.current_attempts != expected_attempts
            || delivery.status == DeliveryStatus::Completed
            || delivery.max_attempts <= expected_attempts
        {
            return Ok(None);
        }
        delivery.current_attempts = expected_attempts + 1;
        delivery.status = status;
        delivery.claimed_at = None;
        delivery.updated_at = now;
        Ok(Some(delivery.clone()))
    }

    async fn reopen_failed(
        &self,
        id: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>> {
        self.check()?;
        let Some(mut delivery) = self.deliveries.get_mut(id) else {
            return Ok(None);
        };
        if delivery.status != DeliveryStatus::Failed {
            return Ok(None);
        }
        delivery.status = DeliveryStatus::Pending;
        delivery.max_attempts = max_attempts;
        delivery.updated_at = now;
        Ok(Some(delivery.clone()))
    }

    async fn release_stale_claims(&self, claimed_before: DateTime<Utc>) -> Result<u64> {
        self.check()?;
        let mut released = 0;
        for mut delivery in self.deliveries.iter_mut() {
            let stale = delivery.status == DeliveryStatus::InProgress
                && delivery.claimed_at.map_or(true, |at| at < claimed_before);
            if stale {
                delivery.status = DeliveryStatus::Pending;
                delivery.claimed_at = None;
                delivery.updated_at = Utc::now();
                released += 1;
            }
        }
        Ok(released)
    }

    async fn list_retry_eligible(&self, limit: usize) -> Result<Vec<Delivery>> {
        self.check()?;
        Ok(self.sorted_deliveries(limit, Delivery::is_retry_eligible))
    }

    async fn list_by_status(&self, status: DeliveryStatus, limit: usize) -> Result<Vec<Delivery>> {
        self.check()?;
        Ok(self.sorted_deliveries(limit, |d| d.status == status))
    }

    async fn list_by_event(&self, event_id: &str) -> Result<Vec<Delivery>> {
        self.check()?;
        Ok(self.sorted_deliveries(usize::MAX, |d| d.event_id == event_id))
    }

    async fn insert_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
        self.check()?;
        let mut attempts = self.attempts.entry(attempt.delivery_id.clone()).or_default();
        if attempts.iter().any(|a| a.attempt_number == attempt.attempt_number) {
            return Err(StoreError::duplicate("delivery_attempt", &attempt.id));
        }
        attempts.push(attempt.clone());
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(())
    }

    async fn list_attempts(&self, delivery_id: &str) -> Result<Vec<DeliveryAttempt>> {
        self.check()?;
        Ok(self
            .attempts
            .get(delivery_id)
            .map(|a| a.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn insert_session(&self, session: &ChatSession) -> Result<()> {
        self.check()?;
        insert_new(&self.sessions, "chat_session", &session.id, session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>> {
        self.check()?;
        Ok(self.sessions.get(id).map(|s| s.clone()))
    }

    async fn mark_handover(&self, session_id: &str) -> Result<bool> {
        self.check()?;
        let Some(mut session) = self.sessions.get_mut(session_id) else {
            return Err(StoreError::not_found("chat_session", session_id));
        };
        if session.handover_requested {
            return Ok(false);
        }
        session.handover_requested = true;
        session.updated_at = Utc::now();
        Ok(true)
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<()> {
        self.check()?;
        let seq = self.message_seq.fetch_add(1, Ordering::SeqCst);
        insert_new(&self.messages, "chat_message", &message.id, &(seq, message.clone()))
    }

    async fn get_message(&self, id: &str) -> Result<Option<ChatMessage>> {
        self.check()?;
        Ok(self.messages.get(id).map(|m| m.1.clone()))
    }

    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        self.check()?;
        let mut msgs: Vec<(u64, ChatMessage)> = self
            .messages
            .iter()
            .filter(|m| m.1.session_id == session_id)
            .map(|m| m.value().clone())
            .collect();
        msgs.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at).then(a.0.cmp(&b.0)));
        let skip = msgs.len().saturating_sub(limit);
        Ok(msgs.into_iter().skip(skip).map(|(_, m)| m).collect())
    }
}
