//! Shared test doubles for engine tests.

use async_trait::async_trait;
use chatloom_core::chunk::{ContentChunk, ToolInfo};
use chatloom_core::error::{ProviderError, StoreError, ToolError, TransportError};
use chatloom_core::message::{ChatMessage, ConversationId, TranscriptMessage};
use chatloom_core::provider::{ChunkStream, Provider};
use chatloom_core::store::MessageStore;
use chatloom_core::tool::{ParameterKind, Tool, ToolParameter};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::delta::DeltaPayload;
use crate::sink::EventSink;
use crate::stream_event::StreamEvent;

/// One scripted provider reply.
pub type Script = Result<Vec<ContentChunk>, ProviderError>;

/// A provider that replays scripted replies and records every transcript.
///
/// Once the script runs out, the last reply repeats.
pub struct ScriptedProvider {
    scripts: Mutex<Vec<Script>>,
    transcripts: Mutex<Vec<Vec<TranscriptMessage>>>,
    tools: serde_json::Value,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            transcripts: Mutex::new(Vec::new()),
            tools: serde_json::json!([]),
        }
    }

    pub fn text(fragments: &[&str]) -> Self {
        Self::new(vec![Ok(fragments.iter().map(|f| ContentChunk::text(*f)).collect())])
    }

    pub fn dispatches(&self) -> usize {
        self.transcripts.lock().unwrap().len()
    }

    pub fn transcript(&self, dispatch: usize) -> Vec<TranscriptMessage> {
        self.transcripts.lock().unwrap()[dispatch].clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn describe_tools(&self) -> &serde_json::Value {
        &self.tools
    }

    async fn stream_turn(
        &self,
        transcript: &[TranscriptMessage],
        cancel: CancellationToken,
    ) -> Result<ChunkStream, ProviderError> {
        self.transcripts.lock().unwrap().push(transcript.to_vec());
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.len() > 1 {
                scripts.remove(0)
            } else {
                scripts[0].clone()
            }
        };
        let chunks = script?;

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for chunk in chunks {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = tx.send(chunk) => if sent.is_err() { return },
                }
            }
        });
        Ok(rx)
    }
}

/// The chunks an adapter emits for one call: first sighting, then the
/// completed arguments at end of stream.
pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> Vec<ContentChunk> {
    let first = ToolInfo::started(id, name);
    let full = first.clone().with_arguments(arguments.to_string());
    vec![ContentChunk::ToolEvent(first), ContentChunk::ToolEvent(full)]
}

/// `web_search` stand-in answering `result-<query>`.
pub struct EchoSearch;

#[async_trait]
impl Tool for EchoSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Echoes the query"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::new("query", ParameterKind::String, "query").required()]
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        Ok(format!("result-{}", arguments["query"].as_str().unwrap_or_default()))
    }
}

/// A tool that always fails.
pub struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "broken"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        Vec::new()
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        _cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "broken".into(),
            reason: "backend unavailable".into(),
        })
    }
}

/// A tool that signals when it starts and takes a while to finish.
///
/// Clones share state, so a test can keep one and register another.
#[derive(Clone, Default)]
pub struct SlowTool {
    pub started: Arc<Notify>,
    pub finished: Arc<AtomicBool>,
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Sleeps before answering"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        Vec::new()
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        _cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        self.started.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok("slow-done".into())
    }
}

/// A tool that waits for the turn to be abandoned, then gives up.
#[derive(Clone, Default)]
pub struct WaitingTool {
    pub started: Arc<Notify>,
}

#[async_trait]
impl Tool for WaitingTool {
    fn name(&self) -> &str {
        "waiting"
    }

    fn description(&self) -> &str {
        "Blocks until cancelled"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        Vec::new()
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        self.started.notify_one();
        tokio::select! {
            _ = cancel.cancelled() => Err(ToolError::Cancelled("waiting".into())),
            _ = tokio::time::sleep(Duration::from_secs(30)) => Ok("waited".into()),
        }
    }
}

/// Records every event; optionally fails after a number of sends.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<StreamEvent>,
    fail_after: Option<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(sends: usize) -> Self {
        Self {
            events: Vec::new(),
            fail_after: Some(sends),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.iter().map(StreamEvent::event_type).collect()
    }

    pub fn deltas(&self) -> Vec<DeltaPayload> {
        self.events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Delta(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn error_types(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Error(err) => Some(err.error_type.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send(&mut self, event: &StreamEvent) -> Result<(), TransportError> {
        if self.fail_after.is_some_and(|n| self.events.len() >= n) {
            return Err(TransportError::Closed);
        }
        self.events.push(event.clone());
        Ok(())
    }
}

/// An in-memory store whose reads or writes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub messages: Mutex<HashMap<ConversationId, Vec<ChatMessage>>>,
    pub fail_reads: bool,
    pub fail_writes: bool,
}

impl FlakyStore {
    pub fn saved(&self, conversation_id: &ConversationId) -> Vec<ChatMessage> {
        self.messages
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn save(&self, message: ChatMessage) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Storage("disk full".into()));
        }
        self.messages
            .lock()
            .unwrap()
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn list(&self, conversation_id: &ConversationId) -> Result<Vec<ChatMessage>, StoreError> {
        if self.fail_reads {
            return Err(StoreError::QueryFailed("connection refused".into()));
        }
        Ok(self.saved(conversation_id))
    }
}
