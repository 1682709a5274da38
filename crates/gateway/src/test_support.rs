//! Test doubles for gateway routes.

use async_trait::async_trait;
use chatloom_core::chunk::ContentChunk;
use chatloom_core::error::ProviderError;
use chatloom_core::message::TranscriptMessage;
use chatloom_core::provider::{ChunkStream, Provider};
use chatloom_core::store::MessageStore;
use chatloom_engine::CompletionOrchestrator;
use chatloom_store::InMemoryStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{GatewayState, SharedState};

/// Replies to every turn with the same text fragments.
pub struct CannedProvider {
    fragments: Vec<String>,
    tools: serde_json::Value,
}

impl CannedProvider {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            tools: serde_json::json!([]),
        }
    }
}

#[async_trait]
impl Provider for CannedProvider {
    fn name(&self) -> &str {
        "canned"
    }

    fn describe_tools(&self) -> &serde_json::Value {
        &self.tools
    }

    async fn stream_turn(
        &self,
        _transcript: &[TranscriptMessage],
        _cancel: CancellationToken,
    ) -> Result<ChunkStream, ProviderError> {
        let (tx, rx) = mpsc::channel(self.fragments.len().max(1));
        for fragment in &self.fragments {
            let _ = tx.send(ContentChunk::text(fragment.clone())).await;
        }
        Ok(rx)
    }
}

pub fn state(fragments: &[&str]) -> SharedState {
    state_with_store(fragments, Arc::new(InMemoryStore::new()))
}

pub fn state_with_store(fragments: &[&str], store: Arc<dyn MessageStore>) -> SharedState {
    let orchestrator = CompletionOrchestrator::new(
        Arc::new(CannedProvider::new(fragments)),
        Arc::new(chatloom_tools::default_registry()),
        store,
    );
    Arc::new(GatewayState {
        orchestrator: Arc::new(orchestrator),
    })
}
