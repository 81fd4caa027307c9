use std::sync::Arc;

use tracing::warn;
use tw_common::EntityType;
use tw_store::ConversationRepository;

use crate::error::Result;

/// Maps an event's entity to the owning tenant (client).
///
/// A message resolves through its session; a session carries its client directly.
/// Everything else is unresolvable and yields `None` with a warning.
pub struct TenantResolver {
    conversations: Arc<dyn ConversationRepository>,
}

impl TenantResolver {
    pub fn new(conversations: Arc<dyn ConversationRepository>) -> Self {
        Self { conversations }
    }

    pub async fn resolve(&self, entity_type: EntityType, entity_id: &str) -> Result<Option<String>> {
        match entity_type {
            EntityType::ChatMessage => {
                let Some(message) = self.conversations.get_message(entity_id).await? else {
                    warn!(entity_id, "Message not found, cannot resolve tenant");
                    return Ok(None);
                };
                self.session_tenant(&message.session_id).await
            }
            EntityType::ChatSession => self.session_tenant(entity_id).await,
            EntityType::Survey | EntityType::SurveyResponse | EntityType::Client => {
                warn!(%entity_type, entity_id, "No tenant resolution for entity type, skipping");
                Ok(None)
            }
        }
    }

    async fn session_tenant(&self, session_id: &str) -> Result<Option<String>> {
        match self.conversations.get_session(session_id).await? {
            Some(session) => Ok(Some(session.client_id)),
            None => {
                warn!(session_id, "Session not found, cannot resolve tenant");
                Ok(None)
            }
        }
    }
}
