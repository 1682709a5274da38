//! One user turn, end to end.
//!
//! The orchestrator opens the message document, loads history, runs the tool
//! loop in its own task, and relays every chunk to the sink as it arrives.
//! A finished turn is persisted under a timeout that does not depend on the
//! client still being connected.

use chatloom_config::AppConfig;
use chatloom_core::chunk::ContentChunk;
use chatloom_core::error::{StoreError, TurnError};
use chatloom_core::message::{ChatMessage, ConversationId, Role, TranscriptMessage};
use chatloom_core::provider::Provider;
use chatloom_core::store::MessageStore;
use chatloom_core::tool::ToolRegistry;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::sink::{EventSink, StreamSession};
use crate::tool_loop::{DEFAULT_MAX_ITERATIONS, ToolLoop, TurnOutcome};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 10;
pub const DEFAULT_SAVE_TIMEOUT: Duration = Duration::from_secs(10);

/// A user message addressed to a conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionRequest {
    pub conversation_id: ConversationId,
    pub message: String,
}

impl CompletionRequest {
    pub fn new(conversation_id: impl Into<ConversationId>, message: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message: message.into(),
        }
    }
}

/// How a turn ended.
#[derive(Debug)]
pub struct TurnReport {
    /// The assistant message id announced in the document `add`.
    pub message_id: String,
    pub outcome: Result<TurnOutcome, TurnError>,
    /// Set when the finished turn could not be persisted.
    pub save_error: Option<TurnError>,
}

pub struct CompletionOrchestrator {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn MessageStore>,
    system_prompt: Option<String>,
    max_iterations: usize,
    channel_capacity: usize,
    save_timeout: Duration,
}

impl CompletionOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            provider,
            tools,
            store,
            system_prompt: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            save_timeout: DEFAULT_SAVE_TIMEOUT,
        }
    }

    /// Build with the limits and system prompt from the config.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        let mut orchestrator = Self::new(provider, tools, store)
            .with_max_iterations(config.engine.max_iterations)
            .with_channel_capacity(config.engine.channel_capacity)
            .with_save_timeout(Duration::from_secs(config.engine.save_timeout_secs));
        if !config.system_prompt.trim().is_empty() {
            orchestrator = orchestrator.with_system_prompt(config.system_prompt.clone());
        }
        orchestrator
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn with_save_timeout(mut self, timeout: Duration) -> Self {
        self.save_timeout = timeout;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Run one turn, streaming its events into `sink`.
    ///
    /// `cancel` is the client's cancellation; it stops relaying but never
    /// interrupts persistence of a turn that already finished.
    pub async fn run_turn<S: EventSink>(
        &self,
        request: CompletionRequest,
        sink: S,
        cancel: CancellationToken,
    ) -> TurnReport {
        let message_id = Uuid::new_v4().to_string();
        let conversation_id = request.conversation_id.clone();
        info!(conversation = %conversation_id, message_id = %message_id, "Starting turn");

        let mut session = StreamSession::new(sink, conversation_id.clone(), message_id.clone());
        let report = |outcome: Result<TurnOutcome, TurnError>, save_error: Option<TurnError>| TurnReport {
            message_id: message_id.clone(),
            outcome,
            save_error,
        };

        if let Err(e) = session.begin().await {
            warn!("Client went away before the turn started: {e}");
            return report(Err(e.into()), None);
        }

        // Stamped now so it sorts before the reply.
        let user_message = ChatMessage::new(conversation_id.clone(), Role::User, &request.message);

        let history = match self.store.get_history(&conversation_id).await {
            Ok(history) => history,
            Err(e) => {
                let err = TurnError::History(e);
                warn!(conversation = %conversation_id, "History fetch failed: {err}");
                let _ = session.fail(&err).await;
                return report(Err(err), None);
            }
        };
        debug!(messages = history.len(), "Loaded conversation history");

        let mut transcript = Vec::with_capacity(history.len() + 2);
        if let Some(prompt) = &self.system_prompt {
            transcript.push(TranscriptMessage::system(prompt));
        }
        transcript.extend(history);
        transcript.push(TranscriptMessage::user(&request.message));

        let outcome = self.relay(transcript, &mut session, &cancel).await;

        let outcome = match outcome {
            Ok(done) => done,
            Err(err) => return report(Err(err), None),
        };

        let delivered = session.complete().await;
        if let Err(e) = &delivered {
            warn!("Completion could not be delivered: {e}");
        }

        let save_error = match self.persist(user_message, &message_id, &outcome.text).await {
            Ok(()) => None,
            Err(e) => {
                let err = TurnError::Save(e);
                warn!(conversation = %conversation_id, "{err}");
                let _ = session.notice(&err).await;
                Some(err)
            }
        };

        info!(
            conversation = %conversation_id,
            iterations = outcome.iterations,
            tool_calls = outcome.tool_calls,
            "Turn delivered"
        );
        report(delivered.map(|()| outcome).map_err(TurnError::from), save_error)
    }

    /// Spawn the loop and forward its chunks until it ends, fails, or the
    /// client cancels.
    async fn relay<S: EventSink>(
        &self,
        mut transcript: Vec<TranscriptMessage>,
        session: &mut StreamSession<S>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let (tx, mut rx) = mpsc::channel(self.channel_capacity);
        let producer_cancel = cancel.child_token();
        let worker_cancel = producer_cancel.clone();
        let tool_loop = ToolLoop::new(self.provider.clone(), self.tools.clone())
            .with_max_iterations(self.max_iterations);

        let worker = tokio::spawn(async move {
            tool_loop.run(&mut transcript, &tx, &worker_cancel).await
        });

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Client cancelled the turn");
                    session.cancel().await;
                    return Err(TurnError::Cancelled);
                }
                chunk = rx.recv() => match chunk {
                    Some(ContentChunk::Error(err)) => {
                        let _ = session.fail(&err).await;
                        return Err(err);
                    }
                    Some(chunk) => {
                        if let Err(e) = session.forward(&chunk).await {
                            warn!("Transport failed mid-turn: {e}");
                            producer_cancel.cancel();
                            return Err(e.into());
                        }
                    }
                    None => break,
                },
            }
        }

        let result = match worker.await {
            Ok(result) => result,
            Err(e) => Err(TurnError::Internal(format!("tool loop task failed: {e}"))),
        };
        if let Err(err) = &result {
            let _ = session.fail(err).await;
        }
        result
    }

    /// Save the user message and the reply, bounded by the save timeout.
    async fn persist(
        &self,
        user_message: ChatMessage,
        message_id: &str,
        text: &str,
    ) -> Result<(), StoreError> {
        let assistant = ChatMessage::new(user_message.conversation_id.clone(), Role::Assistant, text)
            .with_id(message_id);
        let save = async {
            self.store.save(user_message).await?;
            self.store.save(assistant).await
        };
        match tokio::time::timeout(self.save_timeout, save).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.save_timeout.as_secs())),
        }
    }
}
