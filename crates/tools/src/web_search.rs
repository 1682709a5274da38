//! Web search tool backed by a small offline index.
//!
//! Ranking is a plain term-overlap score against titles and snippets, which
//! keeps results deterministic for demos and end-to-end tests.

use async_trait::async_trait;
use chatloom_core::error::ToolError;
use chatloom_core::tool::{ParameterKind, Tool, ToolParameter};
use tokio_util::sync::CancellationToken;
use serde::Serialize;

const DEFAULT_RESULTS: usize = 3;
const MAX_RESULTS: usize = 5;

pub struct WebSearchTool {
    index: Vec<SearchResult>,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            index: builtin_index(),
        }
    }

    /// Use a custom index (tests, demos with canned data).
    pub fn with_index(index: Vec<SearchResult>) -> Self {
        Self { index }
    }

    fn search(&self, query: &str, limit: usize) -> Vec<&SearchResult> {
        let terms: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 1)
            .map(str::to_lowercase)
            .collect();

        let mut scored: Vec<(usize, &SearchResult)> = self
            .index
            .iter()
            .map(|doc| {
                let haystack = format!("{} {}", doc.title, doc.snippet).to_lowercase();
                let score = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                (score, doc)
            })
            .filter(|(score, _)| *score > 0)
            .collect();

        // Stable sort keeps index order among ties.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().take(limit).map(|(_, doc)| doc).collect()
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information. Returns relevant results with titles, URLs, and snippets."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("query", ParameterKind::String, "The search query").required(),
            ToolParameter::new(
                "num_results",
                ParameterKind::Integer,
                "Number of results to return (default 3, max 5)",
            ),
        ]
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        let query = arguments["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("missing 'query' argument".into()))?;

        let limit = arguments["num_results"]
            .as_u64()
            .map_or(DEFAULT_RESULTS, |n| n as usize)
            .clamp(1, MAX_RESULTS);

        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled(self.name().into()));
        }
        let results = self.search(query, limit);
        if results.is_empty() {
            return Ok(format!("No results found for '{query}'."));
        }

        serde_json::to_string_pretty(&results).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

impl SearchResult {
    pub fn new(title: &str, url: &str, snippet: &str) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
        }
    }
}

fn builtin_index() -> Vec<SearchResult> {
    vec![
        SearchResult::new(
            "The Rust Programming Language",
            "https://doc.rust-lang.org/book/",
            "An introductory book about Rust, a language focused on safety, speed, and concurrency.",
        ),
        SearchResult::new(
            "Tokio - An asynchronous Rust runtime",
            "https://tokio.rs/",
            "Tokio is an event-driven, non-blocking I/O platform for writing asynchronous applications with Rust.",
        ),
        SearchResult::new(
            "Server-sent events - Web APIs | MDN",
            "https://developer.mozilla.org/en-US/docs/Web/API/Server-sent_events",
            "Server-sent events let a server push text/event-stream messages to a browser over a long-lived HTTP connection.",
        ),
        SearchResult::new(
            "JSON Patch (RFC 6902)",
            "https://datatracker.ietf.org/doc/html/rfc6902",
            "JSON Patch defines a JSON document structure for expressing a sequence of operations to apply to a JSON document.",
        ),
        SearchResult::new(
            "Function calling - OpenAI API",
            "https://platform.openai.com/docs/guides/function-calling",
            "Connect models to external tools and APIs by describing functions with a JSON schema.",
        ),
        SearchResult::new(
            "Tool use with Claude - Anthropic",
            "https://docs.anthropic.com/en/docs/build-with-claude/tool-use",
            "Claude can interact with external client-side tools and functions, returning tool_use blocks.",
        ),
    ]
}
