//! Shared plumbing for turning an HTTP response body into a chunk stream.
//!
//! Each adapter supplies a [`LineDecoder`] for its framing (SSE or NDJSON);
//! [`spawn_reader`] owns the network read, line splitting, cancellation and
//! delivery into the bounded channel.

use chatloom_core::chunk::{ContentChunk, ToolInfo};
use chatloom_core::error::ProviderError;
use chatloom_core::provider::ChunkStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Buffer size between the reader task and the tool loop.
const READER_CAPACITY: usize = 64;

/// What the reader should do after a decoded line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Keep reading.
    Continue,
    /// The provider signalled end of message.
    Done,
    /// The decoder emitted an error chunk; stop without finishing.
    Failed,
}

/// Provider-specific framing decoder.
pub(crate) trait LineDecoder: Send + 'static {
    /// Handle one complete line (without its terminator).
    fn decode_line(&mut self, line: &str, out: &mut Vec<ContentChunk>) -> Flow;

    /// Called once at a clean end of stream.
    fn finish(&mut self, out: &mut Vec<ContentChunk>);

    /// Whether the provider already marked its message complete, so a body
    /// ending here without an explicit end-of-stream line is still whole.
    fn is_complete(&self) -> bool {
        false
    }
}

/// The error chunk for a data payload that does not parse.
pub(crate) fn malformed(provider: &str, payload: &str, error: &serde_json::Error) -> ContentChunk {
    warn!(provider, payload = %payload, error = %error, "Malformed provider stream payload");
    ContentChunk::error(ProviderError::MalformedStream(format!(
        "{provider}: unparseable payload: {error}"
    )))
}

/// Splits a byte stream into lines.
///
/// Bytes are buffered raw so multi-byte characters split across network
/// reads decode correctly.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete line with `\r\n` or `\n` stripped.
    pub(crate) fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Whatever is left once the body ends without a trailing newline.
    pub(crate) fn take_rest(&mut self) -> Option<String> {
        if self.buf.iter().all(u8::is_ascii_whitespace) {
            self.buf.clear();
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).trim_end().to_string())
    }
}

/// Tracks tool calls as their fragments stream in.
///
/// A `Started` chunk goes out the first time a call has both an id and a
/// name; [`ToolCallTracker::finish`] re-emits every call with its complete
/// arguments so the consumer can fill in what it buffered.
#[derive(Debug, Default)]
pub(crate) struct ToolCallTracker {
    calls: Vec<TrackedCall>,
}

#[derive(Debug)]
struct TrackedCall {
    key: String,
    id: String,
    name: String,
    arguments: String,
    announced: bool,
}

impl ToolCallTracker {
    /// Record a fragment for the call identified by `key`.
    ///
    /// `key` is whatever the provider uses to correlate fragments (an index
    /// or the call id itself).
    pub(crate) fn observe(
        &mut self,
        key: &str,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
        out: &mut Vec<ContentChunk>,
    ) {
        let idx = match self.calls.iter().position(|c| c.key == key) {
            Some(idx) => idx,
            None => {
                self.calls.push(TrackedCall {
                    key: key.to_string(),
                    id: String::new(),
                    name: String::new(),
                    arguments: String::new(),
                    announced: false,
                });
                self.calls.len() - 1
            }
        };
        let call = &mut self.calls[idx];

        if let Some(id) = id.filter(|s| !s.is_empty()) {
            call.id = id.to_string();
        }
        if let Some(name) = name.filter(|s| !s.is_empty()) {
            call.name = name.to_string();
        }
        if let Some(args) = arguments {
            call.arguments.push_str(args);
        }

        if !call.announced && !call.name.is_empty() {
            if call.id.is_empty() {
                call.id = synthesize_call_id();
            }
            call.announced = true;
            out.push(ContentChunk::ToolEvent(ToolInfo::started(&call.id, &call.name)));
        }
    }

    /// Emit every announced call with its accumulated arguments.
    pub(crate) fn finish(&mut self, out: &mut Vec<ContentChunk>) {
        for call in self.calls.drain(..) {
            if !call.announced {
                warn!(key = %call.key, "Dropping tool call fragment that never named a tool");
                continue;
            }
            let arguments = if call.arguments.trim().is_empty() {
                "{}".to_string()
            } else {
                call.arguments
            };
            out.push(ContentChunk::ToolEvent(
                ToolInfo::started(call.id, call.name).with_arguments(arguments),
            ));
        }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

pub(crate) fn synthesize_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Map a non-success HTTP status to a provider error.
///
/// Consumes the response body for the error message.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(format!(
            "{provider}: invalid API key or insufficient permissions"
        )));
    }

    if status != 200 {
        let error_body = response.text().await.unwrap_or_default();
        warn!(provider, status, body = %error_body, "Provider rejected streaming request");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

/// Send a prepared request, racing it against cancellation.
pub(crate) async fn send_request(
    provider: &str,
    request: reqwest::RequestBuilder,
    cancel: &CancellationToken,
) -> Result<reqwest::Response, ProviderError> {
    let response = tokio::select! {
        _ = cancel.cancelled() => {
            return Err(ProviderError::StreamInterrupted("request cancelled".into()));
        }
        result = request.send() => result.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?,
    };
    check_status(provider, response).await
}

/// Spawn the task that reads `response` and feeds decoded chunks to the
/// returned stream.
pub(crate) fn spawn_reader<D: LineDecoder>(
    provider: String,
    response: reqwest::Response,
    decoder: D,
    cancel: CancellationToken,
) -> ChunkStream {
    let (tx, rx) = mpsc::channel(READER_CAPACITY);
    tokio::spawn(read_body(provider, response, decoder, cancel, tx));
    rx
}

async fn read_body<D: LineDecoder>(
    provider: String,
    response: reqwest::Response,
    mut decoder: D,
    cancel: CancellationToken,
    tx: mpsc::Sender<ContentChunk>,
) {
    let mut byte_stream = response.bytes_stream();
    let mut lines = LineBuffer::default();
    let mut out = Vec::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(provider = %provider, "Stream reader cancelled");
                return;
            }
            next = byte_stream.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                lines.push(&bytes);
                while let Some(line) = lines.next_line() {
                    let flow = decoder.decode_line(&line, &mut out);
                    match flow {
                        Flow::Continue => {
                            if !deliver(&tx, &mut out, &cancel).await {
                                return;
                            }
                        }
                        Flow::Done => {
                            decoder.finish(&mut out);
                            deliver(&tx, &mut out, &cancel).await;
                            return;
                        }
                        Flow::Failed => {
                            deliver(&tx, &mut out, &cancel).await;
                            return;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                warn!(provider = %provider, error = %e, "Provider stream interrupted");
                out.clear();
                out.push(ContentChunk::error(ProviderError::StreamInterrupted(e.to_string())));
                deliver(&tx, &mut out, &cancel).await;
                return;
            }
            None => {
                if let Some(line) = lines.take_rest() {
                    match decoder.decode_line(&line, &mut out) {
                        Flow::Failed => {
                            deliver(&tx, &mut out, &cancel).await;
                            return;
                        }
                        Flow::Done => {
                            decoder.finish(&mut out);
                            deliver(&tx, &mut out, &cancel).await;
                            return;
                        }
                        Flow::Continue => {}
                    }
                }
                if decoder.is_complete() {
                    decoder.finish(&mut out);
                } else {
                    warn!(provider = %provider, "Provider stream ended before its end-of-message marker");
                    out.push(ContentChunk::error(ProviderError::StreamInterrupted(
                        "stream ended before the end-of-message marker".into(),
                    )));
                }
                deliver(&tx, &mut out, &cancel).await;
                return;
            }
        }
    }
}

/// Push buffered chunks downstream. Returns false once the consumer is gone.
async fn deliver(
    tx: &mpsc::Sender<ContentChunk>,
    out: &mut Vec<ContentChunk>,
    cancel: &CancellationToken,
) -> bool {
    for chunk in out.drain(..) {
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            res = tx.send(chunk) => res.is_ok(),
        };
        if !sent {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatloom_core::chunk::ToolStatus;

    #[test]
    fn line_buffer_splits_crlf_and_lf() {
        let mut lines = LineBuffer::default();
        lines.push(b"data: one\r\ndata: tw");
        assert_eq!(lines.next_line().as_deref(), Some("data: one"));
        assert_eq!(lines.next_line(), None);
        lines.push(b"o\n\n");
        assert_eq!(lines.next_line().as_deref(), Some("data: two"));
        assert_eq!(lines.next_line().as_deref(), Some(""));
        assert_eq!(lines.take_rest(), None);
    }

    #[test]
    fn line_buffer_keeps_split_utf8_intact() {
        let text = "héllo\n".as_bytes();
        let mut lines = LineBuffer::default();
        lines.push(&text[..2]);
        assert_eq!(lines.next_line(), None);
        lines.push(&text[2..]);
        assert_eq!(lines.next_line().as_deref(), Some("héllo"));
    }

    #[test]
    fn line_buffer_returns_unterminated_tail() {
        let mut lines = LineBuffer::default();
        lines.push(b"{\"done\":true}");
        assert_eq!(lines.next_line(), None);
        assert_eq!(lines.take_rest().as_deref(), Some("{\"done\":true}"));
    }

    #[test]
    fn tracker_announces_once_and_finishes_with_arguments() {
        let mut tracker = ToolCallTracker::default();
        let mut out = Vec::new();

        tracker.observe("0", Some("call_1"), Some("web_search"), Some("{\"q"), &mut out);
        tracker.observe("0", None, None, Some("uery\":\"x\"}"), &mut out);
        assert_eq!(out.len(), 1);
        match &out[0] {
            ContentChunk::ToolEvent(info) => {
                assert_eq!(info.id, "call_1");
                assert_eq!(info.status, ToolStatus::Started);
                assert!(info.arguments.is_none());
            }
            other => panic!("unexpected chunk: {other:?}"),
        }

        out.clear();
        tracker.finish(&mut out);
        match &out[..] {
            [ContentChunk::ToolEvent(info)] => {
                assert_eq!(info.arguments.as_deref(), Some("{\"query\":\"x\"}"));
            }
            other => panic!("unexpected chunks: {other:?}"),
        }
        assert!(tracker.is_empty());
    }

    #[test]
    fn tracker_waits_for_name_and_synthesizes_missing_id() {
        let mut tracker = ToolCallTracker::default();
        let mut out = Vec::new();
        tracker.observe("0", None, None, Some("{}"), &mut out);
        assert!(out.is_empty());
        tracker.observe("0", None, Some("calculator"), None, &mut out);
        match &out[..] {
            [ContentChunk::ToolEvent(info)] => assert!(info.id.starts_with("call_")),
            other => panic!("unexpected chunks: {other:?}"),
        }
    }

    #[test]
    fn tracker_defaults_empty_arguments_to_object() {
        let mut tracker = ToolCallTracker::default();
        let mut out = Vec::new();
        tracker.observe("a", Some("a"), Some("now"), None, &mut out);
        out.clear();
        tracker.finish(&mut out);
        match &out[..] {
            [ContentChunk::ToolEvent(info)] => assert_eq!(info.arguments.as_deref(), Some("{}")),
            other => panic!("unexpected chunks: {other:?}"),
        }
    }
}
