//! The uniform event shape every provider adapter emits.

use serde::{Deserialize, Serialize};

use crate::error::TurnError;

/// Lifecycle of one requested tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// The provider asked for the call.
    Started,
    /// The call is about to run.
    Processing,
    /// The call finished; `result` is populated.
    Completed,
}

/// A tool call as it moves through the turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub status: ToolStatus,
}

impl ToolInfo {
    pub fn started(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: None,
            result: None,
            status: ToolStatus::Started,
        }
    }

    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = Some(arguments.into());
        self
    }

    pub fn processing(&self) -> Self {
        Self {
            status: ToolStatus::Processing,
            ..self.clone()
        }
    }

    pub fn completed(&self, result: impl Into<String>) -> Self {
        Self {
            result: Some(result.into()),
            status: ToolStatus::Completed,
            ..self.clone()
        }
    }
}

/// One atomic unit of streamed output.
#[derive(Debug, Clone)]
pub enum ContentChunk {
    Text(String),
    ToolEvent(ToolInfo),
    Error(TurnError),
}

impl ContentChunk {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn error(e: impl Into<TurnError>) -> Self {
        Self::Error(e.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}
