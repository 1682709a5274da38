//! # chatloom Core
//!
//! Domain types, traits, and error definitions for the chatloom streaming
//! completion engine. Every other crate depends inward on this one.
//!
//! ## Seams
//!
//! - [`Provider`]: a streaming LLM backend
//! - [`Tool`] / [`ToolRegistry`]: capabilities the model can invoke
//! - [`MessageStore`]: conversation persistence

pub mod chunk;
pub mod error;
pub mod message;
pub mod provider;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use chunk::{ContentChunk, ToolInfo, ToolStatus};
pub use error::{Error, ProviderError, Result, StoreError, ToolError, TransportError, TurnError};
pub use message::{ChatMessage, ConversationId, MessageToolCall, Role, TranscriptMessage};
pub use provider::{ChunkStream, Provider, ToolDefinition};
pub use store::MessageStore;
pub use tool::{ParameterKind, Tool, ToolParameter, ToolRegistry};
