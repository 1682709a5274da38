//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Groq, Together AI, DeepSeek, vLLM, and
//! any endpoint exposing `/v1/chat/completions` with SSE streaming.
//!
//! Tool-call fragments arrive keyed by `index`; the id and name come with
//! the first fragment, arguments accumulate across later ones.

use async_trait::async_trait;
use chatloom_core::chunk::ContentChunk;
use chatloom_core::error::ProviderError;
use chatloom_core::message::{Role, TranscriptMessage};
use chatloom_core::provider::{ChunkStream, Provider, ToolDefinition};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::GenerationSettings;
use crate::stream::{self, Flow, LineDecoder, ToolCallTracker};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    settings: GenerationSettings,
    tools: serde_json::Value,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            settings: GenerationSettings::default(),
            tools: serde_json::Value::Array(Vec::new()),
            client: crate::http_client(crate::DEFAULT_CONNECT_TIMEOUT),
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        if settings.connect_timeout != self.settings.connect_timeout {
            self.client = crate::http_client(settings.connect_timeout);
        }
        self.settings = settings;
        self
    }

    /// Serialize the tool catalog into the `tools` request field.
    pub fn with_tools(mut self, tools: &[ToolDefinition]) -> Self {
        self.tools = serde_json::json!(Self::to_api_tools(tools));
        self
    }

    /// Convert transcript entries to OpenAI API format.
    fn to_api_messages(messages: &[TranscriptMessage]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: if m.role == Role::Assistant && m.content.is_empty() && !m.tool_calls.is_empty() {
                    None
                } else {
                    Some(m.content.clone())
                },
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.json_schema(),
                },
            })
            .collect()
    }

    fn request_body(&self, transcript: &[TranscriptMessage]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.settings.model,
            "messages": Self::to_api_messages(transcript),
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
            "stream": true,
        });

        if self.tools.as_array().is_some_and(|t| !t.is_empty()) {
            body["tools"] = self.tools.clone();
        }

        body
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe_tools(&self) -> &serde_json::Value {
        &self.tools
    }

    async fn stream_turn(
        &self,
        transcript: &[TranscriptMessage],
        cancel: CancellationToken,
    ) -> std::result::Result<ChunkStream, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(transcript);

        debug!(
            provider = %self.name,
            model = %self.settings.model,
            messages = transcript.len(),
            "Sending streaming request"
        );

        let request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body);

        let response = stream::send_request(&self.name, request, &cancel).await?;

        Ok(stream::spawn_reader(
            self.name.clone(),
            response,
            SseDecoder::default(),
            cancel,
        ))
    }
}

/// Decodes `data: {...}` lines of a chat-completions stream.
#[derive(Default)]
struct SseDecoder {
    tool_calls: ToolCallTracker,
    /// Set once a choice reports a `finish_reason`.
    finished: bool,
}

impl LineDecoder for SseDecoder {
    fn decode_line(&mut self, line: &str, out: &mut Vec<ContentChunk>) -> Flow {
        // Skip empty lines, SSE comments and named events
        let Some(data) = line.strip_prefix("data:") else {
            return Flow::Continue;
        };
        let data = data.trim();
        if data.is_empty() {
            return Flow::Continue;
        }

        // "[DONE]" signals end of stream
        if data == "[DONE]" {
            return Flow::Done;
        }

        let stream_resp: StreamResponse = match serde_json::from_str(data) {
            Ok(resp) => resp,
            Err(e) => {
                out.push(stream::malformed("openai", data, &e));
                return Flow::Failed;
            }
        };

        if let Some(error) = stream_resp.error {
            out.push(ContentChunk::error(ProviderError::StreamInterrupted(error.message)));
            return Flow::Failed;
        }

        for choice in &stream_resp.choices {
            if choice.finish_reason.is_some() {
                self.finished = true;
            }
            let delta = &choice.delta;

            if let Some(content) = delta.content.as_deref().filter(|c| !c.is_empty()) {
                out.push(ContentChunk::text(content));
            }

            for tc in delta.tool_calls.iter().flatten() {
                let function = tc.function.as_ref();
                self.tool_calls.observe(
                    &tc.index.to_string(),
                    tc.id.as_deref(),
                    function.and_then(|f| f.name.as_deref()),
                    function.and_then(|f| f.arguments.as_deref()),
                    out,
                );
            }
        }

        Flow::Continue
    }

    fn finish(&mut self, out: &mut Vec<ContentChunk>) {
        self.tool_calls.finish(out);
    }

    fn is_complete(&self) -> bool {
        self.finished
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta: arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
