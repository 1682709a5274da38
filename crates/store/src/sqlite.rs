//! SQLite message store.
//!
//! One `messages` table; insertion order is the integer rowid, so history
//! comes back in the order turns were saved even when clocks disagree.

use async_trait::async_trait;
use chatloom_core::error::StoreError;
use chatloom_core::message::{ChatMessage, ConversationId, Role};
use chatloom_core::store::MessageStore;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        let store = Self::connect(options, 4).await?;
        info!("SQLite message store initialized at {}", path.display());
        Ok(store)
    }

    /// An ephemeral database living in a single pooled connection.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite URL: {e}")))?;
        Self::connect(options, 1).await
    }

    async fn connect(options: SqliteConnectOptions, max_connections: u32) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq             INTEGER PRIMARY KEY AUTOINCREMENT,
                id              TEXT UNIQUE NOT NULL,
                conversation_id TEXT NOT NULL,
                role            TEXT NOT NULL,
                content         TEXT NOT NULL,
                created_at      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, seq)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversation index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<ChatMessage, StoreError> {
        let column = |name: &str, e: sqlx::Error| StoreError::QueryFailed(format!("{name} column: {e}"));

        let id: String = row.try_get("id").map_err(|e| column("id", e))?;
        let conversation_id: String = row
            .try_get("conversation_id")
            .map_err(|e| column("conversation_id", e))?;
        let role: String = row.try_get("role").map_err(|e| column("role", e))?;
        let content: String = row.try_get("content").map_err(|e| column("content", e))?;
        let created_at: String = row.try_get("created_at").map_err(|e| column("created_at", e))?;

        let role = Role::from_str(&role).map_err(StoreError::QueryFailed)?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(ChatMessage {
            id,
            conversation_id: ConversationId(conversation_id),
            role,
            content,
            created_at,
        })
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn save(&self, message: ChatMessage) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, role, content, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET content = excluded.content
            "#,
        )
        .bind(&message.id)
        .bind(message.conversation_id.as_str())
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT failed: {e}")))?;

        debug!(id = %message.id, conversation = %message.conversation_id, "Saved message");
        Ok(())
    }

    async fn list(&self, conversation_id: &ConversationId) -> Result<Vec<ChatMessage>, StoreError> {
        let rows = sqlx::query("SELECT * FROM messages WHERE conversation_id = ?1 ORDER BY seq")
            .bind(conversation_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("history: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn history_round_trips_in_order() {
        let store = SqliteStore::in_memory().await.unwrap();
        let conv = ConversationId::from("c1");
        store.save(ChatMessage::new(conv.clone(), Role::User, "hi")).await.unwrap();
        store
            .save(ChatMessage::new(conv.clone(), Role::Assistant, "hello").with_id("m-1"))
            .await
            .unwrap();
        store
            .save(ChatMessage::new(ConversationId::from("c2"), Role::User, "elsewhere"))
            .await
            .unwrap();

        let listed = store.list(&conv).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].role, Role::User);
        assert_eq!(listed[1].id, "m-1");
        assert_eq!(listed[1].content, "hello");
    }

    #[tokio::test]
    async fn duplicate_id_updates_content() {
        let store = SqliteStore::in_memory().await.unwrap();
        let conv = ConversationId::from("c");
        let msg = ChatMessage::new(conv.clone(), Role::Assistant, "partial").with_id("dup");
        store.save(msg.clone()).await.unwrap();
        store
            .save(ChatMessage { content: "complete".into(), ..msg })
            .await
            .unwrap();

        let listed = store.list(&conv).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].content, "complete");
    }
}
