//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible proxy).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via typed SSE events (`content_block_start`,
//!   `content_block_delta`, `content_block_stop`, `message_stop`, `error`)

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

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    settings: GenerationSettings,
    tools: serde_json::Value,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            settings: GenerationSettings::default(),
            tools: serde_json::Value::Array(Vec::new()),
            client: crate::http_client(crate::DEFAULT_CONNECT_TIMEOUT),
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        if settings.connect_timeout != self.settings.connect_timeout {
            self.client = crate::http_client(settings.connect_timeout);
        }
        self.settings = settings;
        self
    }

    /// Serialize the tool catalog into Anthropic's `tools` schema.
    pub fn with_tools(mut self, tools: &[ToolDefinition]) -> Self {
        self.tools = serde_json::json!(Self::to_api_tools(tools));
        self
    }

    /// Split system entries out of the transcript.
    /// Anthropic puts the system prompt in a top-level field, not in messages.
    fn extract_system(messages: &[TranscriptMessage]) -> (Option<String>, Vec<&TranscriptMessage>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut non_system: Vec<&TranscriptMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                _ => non_system.push(msg),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    /// Convert transcript entries to content-block messages.
    ///
    /// Consecutive tool results collapse into one user message, which is
    /// how the API expects answers to parallel tool calls.
    fn to_api_messages(messages: &[&TranscriptMessage]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::User => {
                    result.push(AnthropicMessage {
                        role: "user".into(),
                        content: AnthropicContent::Text(msg.content.clone()),
                    });
                }
                Role::Assistant if msg.tool_calls.is_empty() => {
                    result.push(AnthropicMessage {
                        role: "assistant".into(),
                        content: AnthropicContent::Text(msg.content.clone()),
                    });
                }
                Role::Assistant => {
                    let mut blocks: Vec<ContentBlock> = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(ContentBlock::Text {
                            text: msg.content.clone(),
                        });
                    }
                    for tc in &msg.tool_calls {
                        let input: serde_json::Value = serde_json::from_str(&tc.arguments)
                            .unwrap_or_else(|_| serde_json::json!({}));
                        blocks.push(ContentBlock::ToolUse {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                            input,
                        });
                    }
                    result.push(AnthropicMessage {
                        role: "assistant".into(),
                        content: AnthropicContent::Blocks(blocks),
                    });
                }
                Role::Tool => {
                    let block = ContentBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.content.clone(),
                    };
                    if let Some(AnthropicMessage {
                        role,
                        content: AnthropicContent::Blocks(blocks),
                    }) = result.last_mut()
                    {
                        if role.as_str() == "user" {
                            blocks.push(block);
                            continue;
                        }
                    }
                    result.push(AnthropicMessage {
                        role: "user".into(),
                        content: AnthropicContent::Blocks(vec![block]),
                    });
                }
                Role::System => {} // handled separately
            }
        }

        result
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.json_schema(),
            })
            .collect()
    }

    fn request_body(&self, transcript: &[TranscriptMessage]) -> serde_json::Value {
        let (system, messages) = Self::extract_system(transcript);

        let mut body = serde_json::json!({
            "model": self.settings.model,
            "messages": Self::to_api_messages(&messages),
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
            "stream": true,
        });

        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }

        if self.tools.as_array().is_some_and(|t| !t.is_empty()) {
            body["tools"] = self.tools.clone();
        }

        body
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
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
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.request_body(transcript);

        debug!(provider = "anthropic", model = %self.settings.model, "Sending streaming request");

        let request = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body);

        let response = stream::send_request(&self.name, request, &cancel).await?;

        Ok(stream::spawn_reader(
            self.name.clone(),
            response,
            EventDecoder::default(),
            cancel,
        ))
    }
}

/// Decodes Anthropic's typed SSE events.
///
/// Only `data:` lines are inspected; each payload repeats its event type.
#[derive(Default)]
struct EventDecoder {
    tool_calls: ToolCallTracker,
}

impl LineDecoder for EventDecoder {
    fn decode_line(&mut self, line: &str, out: &mut Vec<ContentChunk>) -> Flow {
        let Some(data) = line.strip_prefix("data:") else {
            return Flow::Continue;
        };
        let data = data.trim();
        if data.is_empty() {
            return Flow::Continue;
        }

        let event: StreamEvent = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                out.push(stream::malformed("anthropic", data, &e));
                return Flow::Failed;
            }
        };

        match event {
            StreamEvent::ContentBlockStart {
                index,
                content_block: StartBlock::ToolUse { id, name },
            } => {
                self.tool_calls
                    .observe(&index.to_string(), Some(&id), Some(&name), None, out);
            }
            StreamEvent::ContentBlockStart { .. } => {}
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => {
                    if !text.is_empty() {
                        out.push(ContentChunk::text(text));
                    }
                }
                BlockDelta::InputJsonDelta { partial_json } => {
                    self.tool_calls
                        .observe(&index.to_string(), None, None, Some(&partial_json), out);
                }
                BlockDelta::Other => {}
            },
            StreamEvent::MessageStop => return Flow::Done,
            StreamEvent::Error { error } => {
                out.push(ContentChunk::error(ProviderError::StreamInterrupted(format!(
                    "{}: {}",
                    error.r#type, error.message
                ))));
                return Flow::Failed;
            }
            StreamEvent::Other => {}
        }

        Flow::Continue
    }

    fn finish(&mut self, out: &mut Vec<ContentChunk>) {
        self.tool_calls.finish(out);
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockStart {
        index: u32,
        content_block: StartBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: BlockDelta,
    },
    MessageStop,
    Error {
        error: ApiErrorBody,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StartBlock {
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    r#type: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatloom_core::chunk::ToolStatus;
    use chatloom_core::message::MessageToolCall;

    fn decode_all(lines: &[&str]) -> (Vec<ContentChunk>, Flow) {
        let mut decoder = EventDecoder::default();
        let mut out = Vec::new();
        let mut flow = Flow::Continue;
        for line in lines {
            flow = decoder.decode_line(line, &mut out);
            if flow != Flow::Continue {
                break;
            }
        }
        if flow != Flow::Failed {
            decoder.finish(&mut out);
        }
        (out, flow)
    }

    #[test]
    fn constructor_with_base_url() {
        let provider = AnthropicProvider::new("sk-ant").with_base_url("http://localhost:9999/");
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, "http://localhost:9999");
    }

    #[test]
    fn system_extraction() {
        let messages = vec![
            TranscriptMessage::system("Be brief"),
            TranscriptMessage::user("Hi"),
        ];
        let (system, rest) = AnthropicProvider::extract_system(&messages);
        assert_eq!(system.as_deref(), Some("Be brief"));
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn consecutive_tool_results_share_one_user_message() {
        let assistant = TranscriptMessage::assistant_tool_calls(
            "",
            vec![
                MessageToolCall { id: "a".into(), name: "x".into(), arguments: "{}".into() },
                MessageToolCall { id: "b".into(), name: "y".into(), arguments: "not json".into() },
            ],
        );
        let r1 = TranscriptMessage::tool_result("a", "1");
        let r2 = TranscriptMessage::tool_result("b", "2");
        let api = AnthropicProvider::to_api_messages(&[&assistant, &r1, &r2]);
        assert_eq!(api.len(), 2);

        let json = serde_json::to_value(&api).unwrap();
        assert_eq!(json[0]["content"][0]["type"], "tool_use");
        assert_eq!(json[0]["content"][1]["input"], serde_json::json!({}));
        assert_eq!(json[1]["role"], "user");
        assert_eq!(json[1]["content"].as_array().unwrap().len(), 2);
        assert_eq!(json[1]["content"][1]["tool_use_id"], "b");
    }

    #[test]
    fn tool_catalog_uses_input_schema() {
        let defs = vec![ToolDefinition {
            name: "calculator".into(),
            description: "Math".into(),
            parameters: vec![],
        }];
        let provider = AnthropicProvider::new("k").with_tools(&defs);
        assert_eq!(provider.describe_tools()[0]["name"], "calculator");
        assert_eq!(provider.describe_tools()[0]["input_schema"]["type"], "object");
    }

    #[test]
    fn request_body_lifts_system_prompt() {
        let provider = AnthropicProvider::new("k");
        let body = provider.request_body(&[
            TranscriptMessage::system("rules"),
            TranscriptMessage::user("hi"),
        ]);
        assert_eq!(body["system"], "rules");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn decodes_text_and_tool_use_events() {
        let (chunks, flow) = decode_all(&[
            "event: message_start",
            r#"data: {"type":"message_start","message":{"id":"msg_1"}}"#,
            r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Let me check"}}"#,
            r#"data: {"type":"content_block_stop","index":0}"#,
            r#"data: {"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"web_search","input":{}}}"#,
            r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"query\":"}}"#,
            r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"x\"}"}}"#,
            r#"data: {"type":"content_block_stop","index":1}"#,
            r#"data: {"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":12}}"#,
            r#"data: {"type":"message_stop"}"#,
        ]);
        assert_eq!(flow, Flow::Done);
        assert_eq!(chunks.len(), 3);
        assert!(matches!(&chunks[0], ContentChunk::Text(t) if t == "Let me check"));
        match (&chunks[1], &chunks[2]) {
            (ContentChunk::ToolEvent(started), ContentChunk::ToolEvent(full)) => {
                assert_eq!(started.id, "toolu_1");
                assert_eq!(started.status, ToolStatus::Started);
                assert_eq!(full.arguments.as_deref(), Some(r#"{"query":"x"}"#));
            }
            other => panic!("unexpected chunks: {other:?}"),
        }
    }

    #[test]
    fn error_event_fails_stream() {
        let (chunks, flow) = decode_all(&[
            r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        ]);
        assert_eq!(flow, Flow::Failed);
        match &chunks[..] {
            [ContentChunk::Error(e)] => {
                assert_eq!(e.error_type(), "generation_error");
                assert!(e.to_string().contains("Overloaded"));
            }
            other => panic!("unexpected chunks: {other:?}"),
        }
    }

    #[test]
    fn rate_limit_error_event_is_classified() {
        let (chunks, _) = decode_all(&[
            r#"data: {"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#,
        ]);
        match &chunks[..] {
            [ContentChunk::Error(e)] => assert_eq!(e.error_type(), "rate_limit_exceeded"),
            other => panic!("unexpected chunks: {other:?}"),
        }
    }

    #[test]
    fn unparseable_data_fails_stream() {
        let (chunks, flow) = decode_all(&[
            "event: content_block_delta",
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"On"}}"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"ty"#,
        ]);
        assert_eq!(flow, Flow::Failed);
        assert!(matches!(&chunks[..], [ContentChunk::Text(_), ContentChunk::Error(_)]));
    }
}
