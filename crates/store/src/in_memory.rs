//! In-memory store, useful for tests and ephemeral sessions.

use async_trait::async_trait;
use chatloom_core::error::StoreError;
use chatloom_core::message::{ChatMessage, ConversationId};
use chatloom_core::store::MessageStore;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Keeps every conversation in a map of append-only vectors.
#[derive(Default)]
pub struct InMemoryStore {
    conversations: RwLock<HashMap<ConversationId, Vec<ChatMessage>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages across all conversations.
    pub async fn len(&self) -> usize {
        self.conversations.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, message: ChatMessage) -> Result<(), StoreError> {
        let mut conversations = self.conversations.write().await;
        let messages = conversations
            .entry(message.conversation_id.clone())
            .or_default();
        // Saving the same id twice replaces the earlier copy.
        match messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => messages.push(message),
        }
        Ok(())
    }

    async fn list(&self, conversation_id: &ConversationId) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self
            .conversations
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}
