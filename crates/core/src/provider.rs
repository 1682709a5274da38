//! Provider trait: the abstraction over streaming LLM backends.
//!
//! A Provider turns one transcript into a lazy, cancellable sequence of
//! [`ContentChunk`]s. Implementations: OpenAI-compatible, Anthropic, Ollama,
//! plus the fallback decorator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chunk::ContentChunk;
use crate::error::ProviderError;
use crate::message::TranscriptMessage;
use crate::tool::ToolParameter;

/// The receiving half of a provider stream.
///
/// Single-consumer and finite: the sender side closes once the provider's
/// response ends, fails, or the turn is cancelled.
pub type ChunkStream = mpsc::Receiver<ContentChunk>;

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// Declared parameters
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
}

impl ToolDefinition {
    /// JSON Schema object describing the tool's parameters.
    pub fn json_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            properties.insert(param.name.clone(), param.json_schema());
            if param.required {
                required.push(serde_json::Value::String(param.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// The core Provider trait.
///
/// The tool loop calls `stream_turn()` once per iteration without knowing
/// which backend is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// The tool catalog in this provider's function-calling schema.
    ///
    /// Serialized once when the provider is built.
    fn describe_tools(&self) -> &serde_json::Value;

    /// Send the transcript and stream back the model's reply.
    ///
    /// Fails before yielding anything when the request itself is rejected.
    /// A failure after streaming began arrives as a single
    /// [`ContentChunk::Error`] followed by end of stream.
    async fn stream_turn(
        &self,
        transcript: &[TranscriptMessage],
        cancel: CancellationToken,
    ) -> std::result::Result<ChunkStream, ProviderError>;
}
