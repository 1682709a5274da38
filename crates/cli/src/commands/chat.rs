//! `chatloom chat`: run turns in-process and print them as they stream.

use async_trait::async_trait;
use chatloom_config::AppConfig;
use chatloom_core::error::TransportError;
use chatloom_core::message::ConversationId;
use chatloom_engine::delta::{CONTENT_PATH, TOOL_CALLS_PATH};
use chatloom_engine::{CompletionOrchestrator, CompletionRequest, EventSink, StreamEvent, apply};
use serde_json::Value;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub async fn run(
    message: Option<String>,
    conversation: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let orchestrator = chatloom_gateway::build_orchestrator(&config).await?;
    let conversation_id = conversation.map(ConversationId::from).unwrap_or_default();

    if let Some(msg) = message {
        return turn(&orchestrator, &conversation_id, msg).await;
    }

    println!();
    println!("  chatloom: interactive mode");
    println!("  Provider:      {}", orchestrator.provider_name());
    println!("  Tools:         {}", orchestrator.tools().names().join(", "));
    println!("  Conversation:  {conversation_id}");
    println!();
    println!("  Type your message and press Enter. Ctrl+C cancels a running turn.");
    println!("  Type 'exit' to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        // A failed turn has already been printed; keep the session going.
        if let Err(e) = turn(&orchestrator, &conversation_id, line.to_string()).await {
            debug!(error = %e, "Turn ended with an error");
        }
        println!();
    }

    Ok(())
}

/// Run one turn with Ctrl+C wired to its cancellation token.
async fn turn(
    orchestrator: &CompletionOrchestrator,
    conversation_id: &ConversationId,
    message: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let mut sink = ConsoleSink::new(std::io::stdout());
    let request = CompletionRequest::new(conversation_id.clone(), message);
    let report = orchestrator.run_turn(request, &mut sink, cancel).await;
    watcher.abort();
    if !sink.is_completed() {
        println!();
    }

    if let Some(e) = &report.save_error {
        warn!(error = %e, "Turn was not saved");
    }
    let outcome = report.outcome?;
    debug!(
        iterations = outcome.iterations,
        tool_calls = outcome.tool_calls,
        "Turn finished"
    );
    Ok(())
}

/// Rebuilds the message document from deltas and prints what changed.
///
/// Text is written as it grows; each tool call update gets its own line.
pub struct ConsoleSink<W> {
    out: W,
    document: Value,
    printed_text: usize,
    printed_tools: usize,
    completed: bool,
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            document: Value::Null,
            printed_text: 0,
            printed_tools: 0,
            completed: false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }

    fn render(&mut self) -> std::io::Result<()> {
        let text = self
            .document
            .pointer(CONTENT_PATH)
            .and_then(Value::as_str)
            .unwrap_or_default();
        if text.len() > self.printed_text {
            self.out.write_all(text[self.printed_text..].as_bytes())?;
            self.printed_text = text.len();
        }

        let tools = self
            .document
            .pointer(TOOL_CALLS_PATH)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for entry in tools.iter().skip(self.printed_tools) {
            let name = entry["name"].as_str().unwrap_or("?");
            let status = entry["status"].as_str().unwrap_or("?");
            writeln!(self.out, "\n[tool] {name}: {status}")?;
        }
        self.printed_tools = self.printed_tools.max(tools.len());

        self.out.flush()
    }
}

#[async_trait]
impl<W: Write + Send> EventSink for ConsoleSink<W> {
    async fn send(&mut self, event: &StreamEvent) -> Result<(), TransportError> {
        let written = match event {
            StreamEvent::DeltaEncoding => Ok(()),
            StreamEvent::Delta(payload) => {
                apply(&mut self.document, payload)
                    .map_err(|e| TransportError::Encode(e.to_string()))?;
                self.render()
            }
            StreamEvent::Error(err) => writeln!(self.out, "\n[{}] {}", err.error_type, err.message),
            StreamEvent::Completion(_) => {
                self.completed = true;
                writeln!(self.out)
            }
        };
        written.map_err(|_| TransportError::Closed)
    }
}
