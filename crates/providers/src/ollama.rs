//! Ollama native provider.
//!
//! Talks to `/api/chat`, which streams newline-delimited JSON objects rather
//! than SSE. Tool calls arrive whole inside one `message` object, with
//! arguments as a JSON object instead of a string.

use async_trait::async_trait;
use chatloom_core::chunk::ContentChunk;
use chatloom_core::error::ProviderError;
use chatloom_core::message::TranscriptMessage;
use chatloom_core::provider::{ChunkStream, Provider, ToolDefinition};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::GenerationSettings;
use crate::stream::{self, Flow, LineDecoder, ToolCallTracker};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaProvider {
    name: String,
    base_url: String,
    settings: GenerationSettings,
    tools: serde_json::Value,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            name: "ollama".into(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .trim_end_matches("/v1")
                .to_string(),
            settings: GenerationSettings::default(),
            tools: serde_json::Value::Array(Vec::new()),
            client: crate::http_client(crate::DEFAULT_CONNECT_TIMEOUT),
        }
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        if settings.connect_timeout != self.settings.connect_timeout {
            self.client = crate::http_client(settings.connect_timeout);
        }
        self.settings = settings;
        self
    }

    /// Serialize the tool catalog (OpenAI-style function objects).
    pub fn with_tools(mut self, tools: &[ToolDefinition]) -> Self {
        let tools: Vec<serde_json::Value> = tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.json_schema(),
                    }
                })
            })
            .collect();
        self.tools = serde_json::Value::Array(tools);
        self
    }

    fn to_api_messages(messages: &[TranscriptMessage]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .map(|m| OllamaMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
                tool_calls: m
                    .tool_calls
                    .iter()
                    .map(|tc| OllamaToolCall {
                        function: OllamaFunction {
                            name: tc.name.clone(),
                            arguments: serde_json::from_str(&tc.arguments)
                                .unwrap_or_else(|_| serde_json::json!({})),
                        },
                    })
                    .collect(),
            })
            .collect()
    }

    fn request_body(&self, transcript: &[TranscriptMessage]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.settings.model,
            "messages": Self::to_api_messages(transcript),
            "stream": true,
            "options": {
                "temperature": self.settings.temperature,
                "num_predict": self.settings.max_tokens,
            },
        });

        if self.tools.as_array().is_some_and(|t| !t.is_empty()) {
            body["tools"] = self.tools.clone();
        }

        body
    }
}

#[async_trait]
impl Provider for OllamaProvider {
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
        let url = format!("{}/api/chat", self.base_url);
        let body = self.request_body(transcript);

        debug!(provider = "ollama", model = %self.settings.model, "Sending streaming request");

        let request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);

        let response = stream::send_request(&self.name, request, &cancel).await?;

        Ok(stream::spawn_reader(
            self.name.clone(),
            response,
            NdjsonDecoder::default(),
            cancel,
        ))
    }
}

/// One JSON object per line; `done: true` ends the message.
#[derive(Default)]
struct NdjsonDecoder {
    tool_calls: ToolCallTracker,
    seen_calls: usize,
}

impl LineDecoder for NdjsonDecoder {
    fn decode_line(&mut self, line: &str, out: &mut Vec<ContentChunk>) -> Flow {
        let line = line.trim();
        if line.is_empty() {
            return Flow::Continue;
        }

        let chunk: StreamLine = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                out.push(stream::malformed("ollama", line, &e));
                return Flow::Failed;
            }
        };

        if let Some(error) = chunk.error {
            out.push(ContentChunk::error(ProviderError::StreamInterrupted(error)));
            return Flow::Failed;
        }

        if let Some(message) = chunk.message {
            if !message.content.is_empty() {
                out.push(ContentChunk::text(message.content));
            }
            for call in message.tool_calls {
                let key = self.seen_calls.to_string();
                self.seen_calls += 1;
                let arguments = call.function.arguments.to_string();
                self.tool_calls.observe(
                    &key,
                    None,
                    Some(&call.function.name),
                    Some(&arguments),
                    out,
                );
            }
        }

        if chunk.done { Flow::Done } else { Flow::Continue }
    }

    fn finish(&mut self, out: &mut Vec<ContentChunk>) {
        self.tool_calls.finish(out);
    }
}

// --- Ollama API types ---

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}
