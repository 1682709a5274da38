//! The delta protocol: incremental edits to a client-held message document.
//!
//! The client starts from nothing. The first delta of a turn is an `add` at
//! the root that creates the document; everything after it appends to or
//! replaces locations that already exist. Paths are JSON pointers.

use chatloom_core::chunk::{ContentChunk, ToolInfo, ToolStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// Path of the streamed answer text.
pub const CONTENT_PATH: &str = "/message/content/parts/0";

/// Path of the informational tool-call log.
pub const TOOL_CALLS_PATH: &str = "/message/metadata/tool_calls";

pub const STATUS_IN_PROGRESS: &str = "in_progress";
pub const STATUS_FINISHED: &str = "finished_successfully";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaOperation {
    Add,
    Append,
    Replace,
    Patch,
}

/// One edit. `patch` carries an array of nested deltas as its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaPayload {
    pub path: String,
    pub operation: DeltaOperation,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter: Option<u64>,
}

impl DeltaPayload {
    pub fn new(path: impl Into<String>, operation: DeltaOperation, value: Value) -> Self {
        Self {
            path: path.into(),
            operation,
            value,
            counter: None,
        }
    }

    pub fn with_counter(mut self, counter: u64) -> Self {
        self.counter = Some(counter);
        self
    }
}

/// The `add` that creates the assistant message document.
pub fn document_add(message_id: &str) -> DeltaPayload {
    DeltaPayload::new(
        "",
        DeltaOperation::Add,
        json!({
            "message": {
                "id": message_id,
                "author": { "role": "assistant" },
                "content": { "content_type": "text", "parts": [""] },
                "status": STATUS_IN_PROGRESS,
                "end_turn": null,
                "metadata": { "tool_calls": [] },
            }
        }),
    )
}

/// The batch that marks the message finished.
pub fn terminal_patch() -> DeltaPayload {
    let ops = [
        DeltaPayload::new("/message/status", DeltaOperation::Replace, json!(STATUS_FINISHED)),
        DeltaPayload::new("/message/end_turn", DeltaOperation::Replace, json!(true)),
    ];
    DeltaPayload::new("", DeltaOperation::Patch, json!(ops))
}

/// Map one chunk to its deltas.
///
/// Errors produce nothing here; they travel on the error event instead.
pub fn encode(chunk: &ContentChunk) -> Vec<DeltaPayload> {
    match chunk {
        ContentChunk::Text(text) if text.is_empty() => Vec::new(),
        ContentChunk::Text(text) => {
            vec![DeltaPayload::new(CONTENT_PATH, DeltaOperation::Append, json!(text))]
        }
        ContentChunk::ToolEvent(info) => {
            vec![DeltaPayload::new(TOOL_CALLS_PATH, DeltaOperation::Append, tool_entry(info))]
        }
        ContentChunk::Error(_) => Vec::new(),
    }
}

fn tool_entry(info: &ToolInfo) -> Value {
    let mut entry = json!({
        "id": info.id,
        "name": info.name,
        "status": info.status,
    });
    match info.status {
        ToolStatus::Completed => {
            entry["result"] = json!(info.result.as_deref().unwrap_or_default());
        }
        ToolStatus::Started | ToolStatus::Processing => {
            if let Some(arguments) = &info.arguments {
                entry["arguments"] = json!(arguments);
            }
        }
    }
    entry
}

#[derive(Debug, Error, PartialEq)]
pub enum DeltaError {
    #[error("path '{0}' does not exist in the document")]
    MissingPath(String),

    #[error("cannot {operation:?} at '{path}': target is neither a string nor an array")]
    NotAppendable { path: String, operation: DeltaOperation },

    #[error("invalid patch at '{path}': {reason}")]
    InvalidPatch { path: String, reason: String },
}

/// Apply a delta to a document the way a client does.
pub fn apply(doc: &mut Value, delta: &DeltaPayload) -> Result<(), DeltaError> {
    match delta.operation {
        DeltaOperation::Add => add(doc, &delta.path, delta.value.clone()),
        DeltaOperation::Replace => {
            let target = locate(doc, &delta.path)?;
            *target = delta.value.clone();
            Ok(())
        }
        DeltaOperation::Append => {
            let target = locate(doc, &delta.path)?;
            match (target, &delta.value) {
                (Value::String(s), Value::String(more)) => {
                    s.push_str(more);
                    Ok(())
                }
                (Value::Array(items), value) => {
                    items.push(value.clone());
                    Ok(())
                }
                _ => Err(DeltaError::NotAppendable {
                    path: delta.path.clone(),
                    operation: delta.operation,
                }),
            }
        }
        DeltaOperation::Patch => {
            let ops: Vec<DeltaPayload> =
                serde_json::from_value(delta.value.clone()).map_err(|e| DeltaError::InvalidPatch {
                    path: delta.path.clone(),
                    reason: e.to_string(),
                })?;
            // Nested paths are relative to the patch's own path.
            for op in ops {
                let nested = DeltaPayload {
                    path: format!("{}{}", delta.path, op.path),
                    ..op
                };
                apply(doc, &nested)?;
            }
            Ok(())
        }
    }
}

fn locate<'a>(doc: &'a mut Value, path: &str) -> Result<&'a mut Value, DeltaError> {
    doc.pointer_mut(path)
        .ok_or_else(|| DeltaError::MissingPath(path.to_string()))
}

fn add(doc: &mut Value, path: &str, value: Value) -> Result<(), DeltaError> {
    if path.is_empty() {
        *doc = value;
        return Ok(());
    }
    let Some((parent_path, key)) = path.rsplit_once('/') else {
        return Err(DeltaError::MissingPath(path.to_string()));
    };
    let key = key.replace("~1", "/").replace("~0", "~");
    match locate(doc, parent_path)? {
        Value::Object(map) => {
            map.insert(key, value);
            Ok(())
        }
        Value::Array(items) if key == "-" => {
            items.push(value);
            Ok(())
        }
        Value::Array(items) => match key.parse::<usize>() {
            Ok(index) if index <= items.len() => {
                items.insert(index, value);
                Ok(())
            }
            _ => Err(DeltaError::MissingPath(path.to_string())),
        },
        _ => Err(DeltaError::MissingPath(path.to_string())),
    }
}
