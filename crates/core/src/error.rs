//! Error types for the chatloom domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`TurnError`] is the
//! turn-level view that carries the stable wire `type` sent to clients.

use thiserror::Error;

/// The top-level error type for chatloom operations outside a streaming turn.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Transport errors ---
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Malformed stream payload: {0}")]
    MalformedStream(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether the failure reads as provider throttling.
    ///
    /// Some gateways report throttling through a plain error body rather than
    /// a 429, so the message is inspected as well.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::ApiError { status_code, message } => {
                *status_code == 429 || mentions_rate_limit(message)
            }
            Self::StreamInterrupted(message) | Self::MalformedStream(message) => {
                mentions_rate_limit(message)
            }
            _ => false,
        }
    }
}

fn mentions_rate_limit(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("rate limit") || lower.contains("rate_limit") || lower.contains("too many requests")
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Store operation timed out after {0}s")]
    Timeout(u64),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool cancelled: {0}")]
    Cancelled(String),
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The peer went away (broken pipe, dropped response body).
    #[error("Client connection closed")]
    Closed,

    /// Response headers were already written with the first frame.
    #[error("Response headers already committed; cannot set '{0}'")]
    HeadersCommitted(String),

    #[error("Invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Failed to encode event: {0}")]
    Encode(String),
}

/// A condition that ends (or, for `Save`, follows) a completion turn.
///
/// Every variant maps to one stable, machine-readable type via
/// [`TurnError::error_type`]; that string is what clients switch on.
#[derive(Debug, Clone, Error)]
pub enum TurnError {
    #[error("{0}")]
    Provider(#[from] ProviderError),

    #[error("Failed to load conversation history: {0}")]
    History(StoreError),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Could not parse arguments for tool '{tool_name}': {reason}")]
    ToolArguments { tool_name: String, reason: String },

    #[error("Maximum tool iterations ({0}) reached without a final answer")]
    MaxIterations(usize),

    #[error("Failed to save assistant message: {0}")]
    Save(StoreError),

    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("Stream cancelled by client")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TurnError {
    /// The stable wire identifier for this error.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Provider(e) if e.is_rate_limit() => "rate_limit_exceeded",
            Self::Provider(_) | Self::Internal(_) => "generation_error",
            Self::History(_) => "history_fetch_failed",
            Self::ToolNotFound(_) => "tool_not_found",
            Self::ToolArguments { .. } => "tool_argument_parse_error",
            Self::MaxIterations(_) => "max_iterations_reached",
            Self::Save(_) => "save_error",
            Self::Transport(_) => "transport_error",
            Self::Cancelled => "stream_cancelled",
        }
    }

    /// Whether this error terminates the turn.
    ///
    /// A failed save happens after delivery and is only reported.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Save(_))
    }

    /// Optional structured context attached to the error event.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Provider(ProviderError::ApiError { status_code, .. }) => {
                Some(serde_json::json!({ "status_code": status_code }))
            }
            Self::Provider(ProviderError::RateLimited { retry_after_secs }) => {
                Some(serde_json::json!({ "retry_after_secs": retry_after_secs }))
            }
            Self::ToolNotFound(name) => Some(serde_json::json!({ "tool": name })),
            Self::ToolArguments { tool_name, .. } => Some(serde_json::json!({ "tool": tool_name })),
            Self::MaxIterations(max) => Some(serde_json::json!({ "max_iterations": max })),
            _ => None,
        }
    }
}
