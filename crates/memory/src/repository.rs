//! In-memory repository tier: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use agentloop_core::error::StorageError;
use agentloop_core::memory::ChatMemoryRepository;
use agentloop_core::message::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Stores each conversation's repository-tier turns in a `Vec`.
#[derive(Clone, Default)]
pub struct InMemoryChatRepository {
    conversations: Arc<RwLock<HashMap<String, Vec<Message>>>>,
}

impl InMemoryChatRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatMemoryRepository for InMemoryChatRepository {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn find_conversation_ids(&self) -> Result<Vec<String>, StorageError> {
        let mut ids: Vec<String> = self.conversations.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn find_by_conversation_id(&self, conversation_id: &str) -> Result<Vec<Message>, StorageError> {
        Ok(self
            .conversations
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_all(&self, conversation_id: &str, messages: &[Message]) -> Result<(), StorageError> {
        self.conversations
            .write()
            .await
            .insert(conversation_id.to_string(), messages.to_vec());
        Ok(())
    }

    async fn delete_by_conversation_id(&self, conversation_id: &str) -> Result<(), StorageError> {
        self.conversations.write().await.remove(conversation_id);
        Ok(())
    }
}
