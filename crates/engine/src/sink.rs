//! Event sinks and the per-turn stream session.

use async_trait::async_trait;
use chatloom_core::chunk::ContentChunk;
use chatloom_core::error::{TransportError, TurnError};
use chatloom_core::message::ConversationId;
use tracing::{debug, trace};

use crate::delta::{self, DeltaPayload};
use crate::stream_event::{CompletionEvent, ErrorEvent, StreamEvent};

/// Where a turn's events go: an SSE response, a terminal, a test recorder.
///
/// `send` returns once the event has been handed to the peer (written and
/// flushed for network transports).
#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, event: &StreamEvent) -> Result<(), TransportError>;
}

#[async_trait]
impl<'a, S: EventSink + ?Sized> EventSink for &'a mut S {
    async fn send(&mut self, event: &StreamEvent) -> Result<(), TransportError> {
        (**self).send(event).await
    }
}

/// Owns the sink for exactly one turn and enforces event ordering.
///
/// - `delta_encoding` and the document `add` go first.
/// - After a fatal error or the completion event, no further deltas or
///   completion are sent; only a non-fatal notice may follow completion.
/// - Once the sink fails or the turn is cancelled, nothing more is written.
pub struct StreamSession<S> {
    sink: S,
    conversation_id: ConversationId,
    message_id: String,
    counter: u64,
    started: bool,
    finished: bool,
    closed: bool,
}

impl<S: EventSink> StreamSession<S> {
    pub fn new(sink: S, conversation_id: ConversationId, message_id: impl Into<String>) -> Self {
        Self {
            sink,
            conversation_id,
            message_id: message_id.into(),
            counter: 0,
            started: false,
            finished: false,
            closed: false,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Whether a fatal error or the completion event was already sent.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether the sink is unusable (failed or cancelled).
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Announce the encoding and create the message document.
    pub async fn begin(&mut self) -> Result<(), TransportError> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        self.write(&StreamEvent::DeltaEncoding).await?;
        let add = delta::document_add(&self.message_id);
        self.delta(add).await
    }

    /// Encode a chunk and send its deltas. Error chunks go through [`fail`].
    ///
    /// [`fail`]: StreamSession::fail
    pub async fn forward(&mut self, chunk: &ContentChunk) -> Result<(), TransportError> {
        if let ContentChunk::Error(err) = chunk {
            return self.fail(err).await;
        }
        for payload in delta::encode(chunk) {
            self.delta(payload).await?;
        }
        Ok(())
    }

    /// Report a fatal error. Only the first one per turn reaches the sink.
    pub async fn fail(&mut self, err: &TurnError) -> Result<(), TransportError> {
        if self.finished || self.closed {
            debug!(error_type = err.error_type(), "Suppressing error after turn ended");
            return Ok(());
        }
        self.finished = true;
        self.write(&StreamEvent::Error(ErrorEvent::from(err))).await
    }

    /// Best-effort cancellation notice; the session is closed afterwards.
    pub async fn cancel(&mut self) {
        if !self.finished && !self.closed {
            self.finished = true;
            // The client is usually gone already.
            let _ = self.write(&StreamEvent::Error(ErrorEvent::from(&TurnError::Cancelled))).await;
        }
        self.closed = true;
    }

    /// Finish the document and send the completion marker.
    pub async fn complete(&mut self) -> Result<(), TransportError> {
        if self.finished || self.closed {
            return Ok(());
        }
        self.delta(delta::terminal_patch()).await?;
        self.finished = true;
        let done = CompletionEvent::new(self.conversation_id.clone());
        self.write(&StreamEvent::Completion(done)).await
    }

    /// A non-fatal error reported after the turn was delivered.
    pub async fn notice(&mut self, err: &TurnError) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.write(&StreamEvent::Error(ErrorEvent::from(err))).await
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    async fn delta(&mut self, payload: DeltaPayload) -> Result<(), TransportError> {
        if self.finished {
            trace!(path = %payload.path, "Dropping delta after turn ended");
            return Ok(());
        }
        let numbered = payload.with_counter(self.counter);
        self.counter += 1;
        self.write(&StreamEvent::Delta(numbered)).await
    }

    async fn write(&mut self, event: &StreamEvent) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if let Err(e) = self.sink.send(event).await {
            self.closed = true;
            return Err(e);
        }
        Ok(())
    }
}
