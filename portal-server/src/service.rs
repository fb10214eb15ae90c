use std::sync::Arc;

use crate::aggregator::{sort_by_recent, ChatAggregator};
use crate::conversation::ConversationSession;
use crate::directory::{IdentityProvider, OrderDirectory};
use crate::error::{ChatError, DirectoryError};
use crate::models::{Conversation, User, UserId};
use crate::store::MessageStore;

/// Shared handle over the message store and its external collaborators.
pub struct ChatService {
    store: Arc<MessageStore>,
    directory: Arc<dyn OrderDirectory>,
    identity: Arc<dyn IdentityProvider>,
    aggregator: ChatAggregator,
}

impl ChatService {
    pub fn new(
        store: Arc<MessageStore>,
        directory: Arc<dyn OrderDirectory>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let aggregator = ChatAggregator::new(store.clone(), directory.clone());
        Self {
            store,
            directory,
            identity,
            aggregator,
        }
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn directory(&self) -> &dyn OrderDirectory {
        self.directory.as_ref()
    }

    /// Resolve a connecting user. Unknown users are refused rather than
    /// reported as bad input.
    pub async fn authenticate(&self, user_id: UserId) -> Result<User, ChatError> {
        match self.identity.current_user(user_id).await {
            Ok(user) => Ok(user),
            Err(DirectoryError::NotFound { .. }) => Err(ChatError::authorization(format!(
                "unknown user {}",
                user_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Conversation list for the viewer, most recent first. With
    /// `include_empty == false` only conversations that already have
    /// messages are returned.
    pub async fn conversation_summaries(
        &self,
        viewer: &User,
        include_empty: bool,
    ) -> Result<Vec<Conversation>, ChatError> {
        let mut conversations = self.aggregator.list_conversations(viewer).await?;
        if !include_empty {
            conversations.retain(|c| c.last_message_at.is_some());
        }
        sort_by_recent(&mut conversations);
        Ok(conversations)
    }

    pub fn session(self: &Arc<Self>, viewer: User) -> ConversationSession {
        ConversationSession::new(self.clone(), viewer)
    }
}
