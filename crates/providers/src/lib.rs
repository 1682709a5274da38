//! LLM Provider implementations for chatloom.
//!
//! All providers implement the `chatloom_core::Provider` trait.
//! The router builds the configured provider (and its fallback) at startup.

pub mod anthropic;
pub mod fallback;
pub mod ollama;
pub mod openai_compat;
pub mod router;
mod stream;

pub use anthropic::AnthropicProvider;
pub use fallback::FallbackProvider;
pub use ollama::OllamaProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{build_from_config, build_provider};

use std::time::Duration;

/// Default time a provider gets to accept a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-request generation parameters, fixed when a provider is built.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Bounds the connect phase of the provider's HTTP client.
    pub connect_timeout: Duration,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            temperature: 0.7,
            max_tokens: 4096,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Shared HTTP client settings.
///
/// Only the connect phase is bounded; streamed bodies may legitimately run
/// for minutes.
pub(crate) fn http_client(connect_timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .unwrap_or_default()
}
