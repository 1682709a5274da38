//! MessageStore trait: persistence of conversation messages.
//!
//! The engine reads a conversation's history at turn start and writes the
//! finished turn back. Implementations: in-memory (testing), SQLite.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::message::{ChatMessage, ConversationId, TranscriptMessage};

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    /// Persist one message.
    async fn save(&self, message: ChatMessage) -> std::result::Result<(), StoreError>;

    /// All messages of a conversation, oldest first.
    async fn list(
        &self,
        conversation_id: &ConversationId,
    ) -> std::result::Result<Vec<ChatMessage>, StoreError>;

    /// History in the shape a provider consumes.
    async fn get_history(
        &self,
        conversation_id: &ConversationId,
    ) -> std::result::Result<Vec<TranscriptMessage>, StoreError> {
        let messages = self.list(conversation_id).await?;
        Ok(messages.iter().map(ChatMessage::to_transcript).collect())
    }
}
