//! Built-in tool implementations for chatloom.
//!
//! The engine only needs the `Tool` trait; these are the tools a stock
//! deployment registers.

pub mod calculator;
pub mod clock;
pub mod web_search;

use chatloom_core::tool::ToolRegistry;

/// Create a registry with all built-in tools.
pub fn default_registry() -> ToolRegistry {
    ToolRegistry::new()
        .with(Box::new(web_search::WebSearchTool::new()))
        .with(Box::new(calculator::CalculatorTool))
        .with(Box::new(clock::ClockTool::new()))
}
