//! Server-sent events transport for one turn.
//!
//! [`channel`] splits a response into two halves: the [`SseTransport`] the
//! orchestrator writes events into, and the [`SseResponse`] the handler turns
//! into an HTTP response once the transport has committed its headers.
//! Every event becomes one body chunk, so each frame is flushed on its own.

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chatloom_core::error::TransportError;
use chatloom_engine::{EventSink, StreamEvent};
use std::convert::Infallible;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Frames buffered between the turn and the socket.
pub const FRAME_BUFFER: usize = 16;

pub struct SseTransport {
    headers: HeaderMap,
    head: Option<oneshot::Sender<HeaderMap>>,
    frames: mpsc::Sender<Bytes>,
}

pub struct SseResponse {
    head: oneshot::Receiver<HeaderMap>,
    frames: mpsc::Receiver<Bytes>,
}

/// Create a connected transport/response pair.
pub fn channel(buffer: usize) -> (SseTransport, SseResponse) {
    let (head_tx, head_rx) = oneshot::channel();
    let (frame_tx, frame_rx) = mpsc::channel(buffer.max(1));

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );

    let transport = SseTransport {
        headers,
        head: Some(head_tx),
        frames: frame_tx,
    };
    let response = SseResponse {
        head: head_rx,
        frames: frame_rx,
    };
    (transport, response)
}

impl SseTransport {
    /// Add or replace a response header. Fails once the first frame is out.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), TransportError> {
        if self.is_committed() {
            return Err(TransportError::HeadersCommitted(name.to_string()));
        }
        let invalid = |reason: String| TransportError::InvalidHeader {
            name: name.to_string(),
            reason,
        };
        let name = HeaderName::try_from(name).map_err(|e| invalid(e.to_string()))?;
        let value = HeaderValue::try_from(value).map_err(|e| invalid(e.to_string()))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn is_committed(&self) -> bool {
        self.head.is_none()
    }

    fn commit(&mut self) -> Result<(), TransportError> {
        let Some(head) = self.head.take() else {
            return Ok(());
        };
        head.send(std::mem::take(&mut self.headers))
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl EventSink for SseTransport {
    async fn send(&mut self, event: &StreamEvent) -> Result<(), TransportError> {
        let frame = event
            .to_frame()
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        self.commit()?;
        self.frames
            .send(Bytes::from(frame))
            .await
            .map_err(|_| TransportError::Closed)
    }
}

impl SseResponse {
    /// Wait for the headers, then stream frames as the body.
    ///
    /// `cancel` fires when the body is dropped, which is how a client
    /// disconnect reaches the turn.
    pub async fn into_response(self, cancel: CancellationToken) -> Response {
        let guard = cancel.drop_guard();
        let headers = match self.head.await {
            Ok(headers) => headers,
            Err(_) => {
                warn!("Turn ended before sending any event");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        let body = ReceiverStream::new(self.frames).map(move |frame| {
            // Held by the stream; dropping the body cancels the turn.
            let _ = &guard;
            debug!(bytes = frame.len(), "SSE frame");
            Ok::<_, Infallible>(frame)
        });

        (headers, Body::from_stream(body)).into_response()
    }
}
