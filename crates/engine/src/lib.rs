//! The streaming completion engine.
//!
//! A turn flows through four stages:
//!
//! 1. **Orchestrate**: mint the assistant message, load history, open the stream
//! 2. **Loop**: dispatch the transcript, run requested tools, repeat
//! 3. **Encode**: turn each chunk into deltas against the client's document
//! 4. **Deliver**: hand events to an [`EventSink`] in production order
//!
//! The loop runs in its own task and talks to the orchestrator over a
//! bounded channel; one cancellation token per turn reaches every stage.

pub mod delta;
pub mod orchestrator;
pub mod sink;
pub mod stream_event;
pub mod tool_loop;

#[cfg(test)]
mod test_helpers;

pub use delta::{DeltaError, DeltaOperation, DeltaPayload, apply};
pub use orchestrator::{CompletionOrchestrator, CompletionRequest, TurnReport};
pub use sink::{EventSink, StreamSession};
pub use stream_event::{CompletionEvent, ErrorEvent, StreamEvent, parse_frames};
pub use tool_loop::{ToolLoop, TurnOutcome};
