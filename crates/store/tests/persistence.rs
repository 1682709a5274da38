//! File-backed persistence across store instances.

use chatloom_config::StoreConfig;
use chatloom_core::message::{ChatMessage, ConversationId, Role};
use chatloom_core::store::MessageStore;
use chatloom_store::SqliteStore;

#[tokio::test]
async fn sqlite_history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chat.db");
    let conv = ConversationId::from("persisted");

    {
        let store = SqliteStore::open(&path).await.unwrap();
        store.save(ChatMessage::new(conv.clone(), Role::User, "remember me")).await.unwrap();
        store
            .save(ChatMessage::new(conv.clone(), Role::Assistant, "noted"))
            .await
            .unwrap();
    }

    let reopened = SqliteStore::open(&path).await.unwrap();
    let history = reopened.get_history(&conv).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "remember me");
    assert_eq!(history[1].role, Role::Assistant);
}

#[tokio::test]
async fn open_from_config_creates_parent_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig {
        backend: "sqlite".into(),
        path: Some(dir.path().join("nested").join("chat.db")),
    };

    let store = chatloom_store::open(&config).await.unwrap();
    assert_eq!(store.name(), "sqlite");
    assert!(dir.path().join("nested").join("chat.db").exists());
}
