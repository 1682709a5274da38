//! Current-time tool.

use async_trait::async_trait;
use chatloom_core::error::ToolError;
use chatloom_core::tool::{ParameterKind, Tool, ToolParameter};
use tokio_util::sync::CancellationToken;
use chrono::{DateTime, Utc};

pub struct ClockTool {
    now: fn() -> DateTime<Utc>,
}

impl ClockTool {
    pub fn new() -> Self {
        Self { now: Utc::now }
    }

    #[cfg(test)]
    fn fixed(now: fn() -> DateTime<Utc>) -> Self {
        Self { now }
    }
}

impl Default for ClockTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current UTC date and time."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("format", ParameterKind::String, "Output format (default rfc3339)")
                .with_enum(["rfc3339", "unix", "date"]),
        ]
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        let now = (self.now)();
        match arguments["format"].as_str().unwrap_or("rfc3339") {
            "rfc3339" => Ok(now.to_rfc3339()),
            "unix" => Ok(now.timestamp().to_string()),
            "date" => Ok(now.format("%Y-%m-%d").to_string()),
            other => Err(ToolError::InvalidArguments(format!("unsupported format '{other}'"))),
        }
    }
}
