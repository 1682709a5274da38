//! The bounded dispatch/execute cycle.
//!
//! Each iteration sends the transcript to the provider, forwards what comes
//! back, and runs any tools the model asked for. The loop ends when the model
//! answers without tool calls, on the first fatal error, or when the
//! iteration cap is hit.

use chatloom_core::chunk::{ContentChunk, ToolInfo};
use chatloom_core::error::TurnError;
use chatloom_core::message::{MessageToolCall, TranscriptMessage};
use chatloom_core::provider::Provider;
use chatloom_core::tool::ToolRegistry;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default cap on provider dispatches per turn.
pub const DEFAULT_MAX_ITERATIONS: usize = 5;

/// What a successful turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// All text the model streamed, across iterations.
    pub text: String,
    /// Provider dispatches made.
    pub iterations: usize,
    /// Tool calls executed.
    pub tool_calls: usize,
}

pub struct ToolLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    max_iterations: usize,
}

impl ToolLoop {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            tools,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Set the maximum number of provider dispatches.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    /// Run one turn over `transcript`, forwarding chunks into `tx`.
    ///
    /// Fatal errors are forwarded as an [`ContentChunk::Error`] before being
    /// returned. A tool that is already executing when `cancel` fires gets
    /// the same token and may stop early; either way its exchange is recorded
    /// before the loop gives up.
    pub async fn run(
        &self,
        transcript: &mut Vec<TranscriptMessage>,
        tx: &mpsc::Sender<ContentChunk>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let mut text = String::new();
        let mut tool_calls = 0;

        for iteration in 0..self.max_iterations {
            if cancel.is_cancelled() {
                return Err(TurnError::Cancelled);
            }
            debug!(
                iteration,
                provider = self.provider.name(),
                messages = transcript.len(),
                "Dispatching transcript"
            );

            let (reply, pending) = self.drain(transcript, tx, cancel).await?;
            text.push_str(&reply);

            if pending.is_empty() {
                transcript.push(TranscriptMessage::assistant(reply));
                info!(iterations = iteration + 1, tool_calls, "Turn finished");
                return Ok(TurnOutcome {
                    text,
                    iterations: iteration + 1,
                    tool_calls,
                });
            }

            debug!(count = pending.len(), "Executing tool calls");
            tool_calls += self.execute(reply, &pending, transcript, tx, cancel).await?;
        }

        warn!(max = self.max_iterations, "Max tool iterations reached");
        Err(self
            .fatal(tx, cancel, TurnError::MaxIterations(self.max_iterations))
            .await)
    }

    /// Stream one provider reply. Returns its text and the requested calls.
    async fn drain(
        &self,
        transcript: &[TranscriptMessage],
        tx: &mpsc::Sender<ContentChunk>,
        cancel: &CancellationToken,
    ) -> Result<(String, Vec<ToolInfo>), TurnError> {
        let mut stream = match self.provider.stream_turn(transcript, cancel.clone()).await {
            Ok(stream) => stream,
            Err(e) if cancel.is_cancelled() => {
                debug!("Dispatch abandoned after cancellation: {e}");
                return Err(TurnError::Cancelled);
            }
            Err(e) => return Err(self.fatal(tx, cancel, e.into()).await),
        };

        let mut reply = String::new();
        let mut pending: Vec<ToolInfo> = Vec::new();

        while let Some(chunk) = stream.recv().await {
            match chunk {
                ContentChunk::Text(fragment) => {
                    reply.push_str(&fragment);
                    forward(tx, cancel, ContentChunk::Text(fragment)).await?;
                }
                ContentChunk::ToolEvent(info) => {
                    // Later sightings of an id only fill in name and arguments.
                    if let Some(known) = pending.iter_mut().find(|p| p.id == info.id) {
                        if !info.name.is_empty() {
                            known.name = info.name;
                        }
                        if info.arguments.is_some() {
                            known.arguments = info.arguments;
                        }
                        continue;
                    }
                    pending.push(info.clone());
                    forward(tx, cancel, ContentChunk::ToolEvent(info)).await?;
                }
                ContentChunk::Error(err) => return Err(self.fatal(tx, cancel, err).await),
            }
        }

        // The provider closes its stream on cancellation; what arrived may be partial.
        if cancel.is_cancelled() {
            return Err(TurnError::Cancelled);
        }
        Ok((reply, pending))
    }

    /// Run the requested calls in order and record the exchange.
    async fn execute(
        &self,
        reply: String,
        pending: &[ToolInfo],
        transcript: &mut Vec<TranscriptMessage>,
        tx: &mpsc::Sender<ContentChunk>,
        cancel: &CancellationToken,
    ) -> Result<usize, TurnError> {
        let mut calls = Vec::with_capacity(pending.len());
        let mut results = Vec::with_capacity(pending.len());
        let mut interrupted = None;

        for info in pending {
            let Some(tool) = self.tools.get(&info.name) else {
                return Err(self
                    .fatal(tx, cancel, TurnError::ToolNotFound(info.name.clone()))
                    .await);
            };
            let raw = info.arguments.as_deref().unwrap_or_default();
            let arguments = match parse_arguments(raw) {
                Ok(arguments) => arguments,
                Err(reason) => {
                    let err = TurnError::ToolArguments {
                        tool_name: info.name.clone(),
                        reason,
                    };
                    return Err(self.fatal(tx, cancel, err).await);
                }
            };

            if let Err(e) = forward(tx, cancel, ContentChunk::ToolEvent(info.processing())).await {
                interrupted = Some(e);
                break;
            }

            // Not raced against cancellation: the tool sees the token and
            // decides when to stop, and whatever it returns is recorded.
            let output = match tool.execute(arguments, cancel).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(tool = %info.name, error = %e, "Tool execution failed");
                    format!("Error: {e}")
                }
            };

            calls.push(MessageToolCall {
                id: info.id.clone(),
                name: info.name.clone(),
                arguments: if raw.trim().is_empty() { "{}".into() } else { raw.to_string() },
            });
            results.push(TranscriptMessage::tool_result(&info.id, &output));

            if let Err(e) = forward(tx, cancel, ContentChunk::ToolEvent(info.completed(output))).await {
                interrupted = Some(e);
                break;
            }
        }

        let executed = calls.len();
        if executed > 0 {
            transcript.push(TranscriptMessage::assistant_tool_calls(reply, calls));
            transcript.extend(results);
        }
        match interrupted {
            Some(e) => Err(e),
            None => Ok(executed),
        }
    }

    /// Log a fatal error and pass it downstream before returning it.
    async fn fatal(
        &self,
        tx: &mpsc::Sender<ContentChunk>,
        cancel: &CancellationToken,
        err: TurnError,
    ) -> TurnError {
        warn!(error_type = err.error_type(), "Turn aborted: {err}");
        if forward(tx, cancel, ContentChunk::Error(err.clone())).await.is_err() {
            debug!("Consumer gone before the error could be forwarded");
        }
        err
    }
}

/// Empty arguments mean "no arguments".
fn parse_arguments(raw: &str) -> Result<serde_json::Value, String> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw).map_err(|e| e.to_string())
}

async fn forward(
    tx: &mpsc::Sender<ContentChunk>,
    cancel: &CancellationToken,
    chunk: ContentChunk,
) -> Result<(), TurnError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TurnError::Cancelled),
        sent = tx.send(chunk) => sent.map_err(|_| TurnError::Cancelled),
    }
}
