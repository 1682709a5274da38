//! Conversation message stores for chatloom.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use chatloom_config::StoreConfig;
use chatloom_core::error::StoreError;
use chatloom_core::store::MessageStore;
use std::sync::Arc;
use tracing::info;

/// Open the backend named in the config.
pub async fn open(config: &StoreConfig) -> Result<Arc<dyn MessageStore>, StoreError> {
    match config.backend.as_str() {
        "memory" => {
            info!("Using in-memory message store");
            Ok(Arc::new(InMemoryStore::new()))
        }
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let path = config.sqlite_path();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::Storage(format!("create {}: {e}", parent.display())))?;
            }
            let store = SqliteStore::open(&path).await?;
            Ok(Arc::new(store))
        }
        other => Err(StoreError::Storage(format!("unsupported store backend '{other}'"))),
    }
}
