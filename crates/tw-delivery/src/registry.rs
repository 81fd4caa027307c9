//! Processor Registry
//!
//! Per-tenant delivery rules. Configs are validated on every write so dispatch never sees
//! a config that does not fit its protocol.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use tw_common::{EntityType, EventType, ProcessorConfig};
use tw_store::ProcessorConfigRepository;

use crate::error::{DeliveryError, Result};

pub struct ProcessorRegistry {
    configs: Arc<dyn ProcessorConfigRepository>,
}

impl ProcessorRegistry {
    pub fn new(configs: Arc<dyn ProcessorConfigRepository>) -> Self {
        Self { configs }
    }

    pub async fn create(&self, config: ProcessorConfig) -> Result<ProcessorConfig> {
        config.processor.validate()?;
        self.configs.insert_config(&config).await?;
        info!(
            config_id = %config.id,
            tenant_id = %config.tenant_id,
            processor_type = ?config.processor_type(),
            "Processor config created"
        );
        Ok(config)
    }

    pub async fn update(&self, mut config: ProcessorConfig) -> Result<ProcessorConfig> {
        config.processor.validate()?;
        config.updated_at = Utc::now();
        self.configs.update_config(&config).await?;
        info!(config_id = %config.id, is_active = config.is_active, "Processor config updated");
        Ok(config)
    }

    pub async fn set_active(&self, id: &str, active: bool) -> Result<ProcessorConfig> {
        let mut config = self
            .configs
            .get_config(id)
            .await?
            .ok_or_else(|| DeliveryError::not_found("processor_config", id))?;
        config.is_active = active;
        self.update(config).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<ProcessorConfig>> {
        Ok(self.configs.get_config(id).await?)
    }

    /// Active configs of the tenant whose type filters admit the event.
    /// An empty filter set admits every type.
    pub async fn match_configs(
        &self,
        tenant_id: &str,
        event_type: EventType,
        entity_type: EntityType,
    ) -> Result<Vec<ProcessorConfig>> {
        let candidates = self.configs.find_active_by_tenant(tenant_id).await?;
        let total = candidates.len();
        let matched: Vec<ProcessorConfig> = candidates
            .into_iter()
            .filter(|c| c.matches(event_type, entity_type))
            .collect();
        debug!(
            tenant_id,
            %event_type,
            %entity_type,
            candidates = total,
            matched = matched.len(),
            "Matched processor configs"
        );
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tw_common::{HttpWebhookConfig, ProcessorKind};
    use tw_store::MemoryStore;

    fn webhook(tenant: &str) -> ProcessorConfig {
        ProcessorConfig::new(
            tenant,
            "hook",
            ProcessorKind::HttpWebhook(HttpWebhookConfig::new("https://hooks.example.com/in")),
        )
        .unwrap()
    }

    fn registry() -> ProcessorRegistry {
        ProcessorRegistry::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_wildcard_config_matches_everything() {
        let registry = registry();
        let config = registry.create(webhook("t1")).await.unwrap();

        for event_type in [EventType::MessageCreated, EventType::SurveyCompleted, EventType::SessionClosed] {
            for entity_type in [EntityType::ChatMessage, EntityType::Survey, EntityType::Client] {
                let matched = registry.match_configs("t1", event_type, entity_type).await.unwrap();
                assert_eq!(matched.len(), 1, "{event_type}/{entity_type}");
                assert_eq!(matched[0].id, config.id);
            }
        }
    }

    #[tokio::test]
    async fn test_filters_are_conjunctive() {
        let registry = registry();
        registry
            .create(
                webhook("t1")
                    .with_event_types([EventType::MessageCreated])
                    .with_entity_types([EntityType::ChatMessage]),
            )
            .await
            .unwrap();

        let hit = registry
            .match_configs("t1", EventType::MessageCreated, EntityType::ChatMessage)
            .await
            .unwrap();
        let wrong_entity = registry
            .match_configs("t1", EventType::MessageCreated, EntityType::ChatSession)
            .await
            .unwrap();
        let wrong_event = registry
            .match_configs("t1", EventType::MessageUpdated, EntityType::ChatMessage)
            .await
            .unwrap();

        assert_eq!(hit.len(), 1);
        assert!(wrong_entity.is_empty());
        assert!(wrong_event.is_empty());
    }

    #[tokio::test]
    async fn test_other_tenants_and_inactive_configs_excluded() {
        let registry = registry();
        let config = registry.create(webhook("t1")).await.unwrap();
        registry.create(webhook("t2")).await.unwrap();

        registry.set_active(&config.id, false).await.unwrap();

        let matched = registry
            .match_configs("t1", EventType::MessageCreated, EntityType::ChatMessage)
            .await
            .unwrap();
        assert!(matched.is_empty());
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_config() {
        let registry = registry();
        let mut config = registry.create(webhook("t1")).await.unwrap();
        config.processor = ProcessorKind::HttpWebhook(HttpWebhookConfig::new("not a url"));

        let err = registry.update(config).await.unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidConfig(_)));
    }
}
