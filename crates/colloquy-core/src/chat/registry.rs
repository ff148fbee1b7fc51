//! Get-or-create and soft delete for conversations keyed by external id.

use std::sync::Arc;

use tracing::{debug, info};

use colloquy_types::chat::{Conversation, ConversationStatus};
use colloquy_types::error::RepositoryError;

use crate::chat::repository::ChatRepository;

/// Conversation lifecycle on top of a [`ChatRepository`].
pub struct ConversationRegistry<C: ChatRepository> {
    repo: Arc<C>,
}

impl<C: ChatRepository> ConversationRegistry<C> {
    pub fn new(repo: Arc<C>) -> Self {
        Self { repo }
    }

    /// Make sure `conversation_id` exists, creating it if needed.
    ///
    /// An existing conversation is returned untouched, so the first writer's
    /// owner and model win. Losing a creation race counts as success.
    pub async fn ensure_exists(
        &self,
        conversation_id: &str,
        owner_id: &str,
        model_name: &str,
    ) -> Result<Conversation, RepositoryError> {
        if let Some(existing) = self.repo.get_conversation(conversation_id).await? {
            return Ok(existing);
        }

        let conversation = Conversation::new(conversation_id, owner_id, model_name);
        match self.repo.create_conversation(&conversation).await {
            Ok(created) => {
                info!(conversation_id = %conversation_id, owner_id = %owner_id, "Conversation created");
                Ok(created)
            }
            Err(RepositoryError::Conflict(_)) => {
                debug!(conversation_id = %conversation_id, "Conversation created concurrently");
                self.repo
                    .get_conversation(conversation_id)
                    .await?
                    .ok_or(RepositoryError::NotFound)
            }
            Err(e) => Err(e),
        }
    }

    /// Create a conversation explicitly. `Conflict` when the id is taken.
    pub async fn create(&self, conversation: &Conversation) -> Result<Conversation, RepositoryError> {
        let created = self.repo.create_conversation(conversation).await?;
        info!(conversation_id = %created.id, owner_id = %created.owner_id, "Conversation created");
        Ok(created)
    }

    /// A live (not deleted) conversation, or `None`.
    pub async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self
            .repo
            .get_conversation(conversation_id)
            .await?
            .filter(|c| c.status != ConversationStatus::Deleted))
    }

    /// Soft delete: the row stays, its status becomes `deleted`.
    pub async fn delete(&self, conversation_id: &str) -> Result<(), RepositoryError> {
        if self.get(conversation_id).await?.is_none() {
            return Err(RepositoryError::NotFound);
        }
        self.repo
            .set_conversation_status(conversation_id, ConversationStatus::Deleted)
            .await?;
        info!(conversation_id = %conversation_id, "Conversation deleted");
        Ok(())
    }
}
