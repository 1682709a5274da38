//! Turn-level streaming events.
//!
//! `StreamEvent` is what leaves the engine: the encoding handshake, deltas,
//! at most one error, and the completion marker. Each event becomes one SSE
//! frame.

use chatloom_core::error::TurnError;
use chatloom_core::message::ConversationId;
use serde::{Deserialize, Serialize};

use crate::delta::DeltaPayload;

/// Version string announced by the first event of every turn.
pub const DELTA_ENCODING: &str = "v1";

/// `type` value of the completion event.
pub const MESSAGE_STREAM_COMPLETE: &str = "message_stream_complete";

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// `event: delta_encoding`, data `"v1"`.
    DeltaEncoding,

    /// `event: delta`.
    Delta(DeltaPayload),

    /// `event: error`.
    Error(ErrorEvent),

    /// `event: completion`.
    Completion(CompletionEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&TurnError> for ErrorEvent {
    fn from(err: &TurnError) -> Self {
        Self {
            error_type: err.error_type().to_string(),
            message: err.to_string(),
            details: err.details(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub conversation_id: ConversationId,
}

impl CompletionEvent {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            kind: MESSAGE_STREAM_COMPLETE.into(),
            conversation_id,
        }
    }
}

impl StreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::DeltaEncoding => "delta_encoding",
            Self::Delta(_) => "delta",
            Self::Error(_) => "error",
            Self::Completion(_) => "completion",
        }
    }

    /// The JSON carried on the `data:` line.
    pub fn data(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::DeltaEncoding => serde_json::to_string(DELTA_ENCODING),
            Self::Delta(delta) => serde_json::to_string(delta),
            Self::Error(error) => serde_json::to_string(error),
            Self::Completion(done) => serde_json::to_string(done),
        }
    }

    /// One complete SSE frame: `event: <name>\ndata: <json>\n\n`.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("event: {}\ndata: {}\n\n", self.event_type(), self.data()?))
    }

    /// Rebuild an event from its SSE name and data, as a client would.
    pub fn from_parts(event: &str, data: &str) -> Result<Self, serde_json::Error> {
        use serde::de::Error as _;
        match event {
            "delta_encoding" => {
                let version: String = serde_json::from_str(data)?;
                if version == DELTA_ENCODING {
                    Ok(Self::DeltaEncoding)
                } else {
                    Err(serde_json::Error::custom(format!("unsupported delta encoding '{version}'")))
                }
            }
            "delta" => serde_json::from_str(data).map(Self::Delta),
            "error" => serde_json::from_str(data).map(Self::Error),
            "completion" => serde_json::from_str(data).map(Self::Completion),
            other => Err(serde_json::Error::custom(format!("unknown event '{other}'"))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completion(_) | Self::Error(_))
    }
}

/// Split an SSE body into events. Unknown or malformed frames are skipped.
pub fn parse_frames(body: &str) -> Vec<StreamEvent> {
    body.split("\n\n")
        .filter_map(|frame| {
            let mut name = None;
            let mut data = None;
            for line in frame.lines() {
                if let Some(rest) = line.strip_prefix("event:") {
                    name = Some(rest.trim());
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data = Some(rest.trim());
                }
            }
            StreamEvent::from_parts(name?, data?).ok()
        })
        .collect()
}
