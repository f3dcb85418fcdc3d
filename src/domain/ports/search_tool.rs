//! Search tool port and the tool-call record shape.
//!
//! Real adapters (web search, arXiv, internal RAG) live outside the engine;
//! the port plus the recorder define the contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One result returned by a search tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// 0..1 relevance as reported by the tool.
    #[serde(default)]
    pub relevance_score: f64,
}

/// Tool invocation errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool unavailable: {0}")]
    Unavailable(String),

    #[error("Tool invocation failed: {0}")]
    Failed(String),
}

/// Outcome of one recorded tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Success,
    Error,
}

/// Captured tool invocation, persisted as one JSONL line per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub input: String,
    pub output_summary: String,
    pub duration_ms: u64,
    pub status: ToolCallStatus,
    pub timestamp: DateTime<Utc>,
}

/// Port trait for search tools.
#[async_trait]
pub trait SearchTool: Send + Sync {
    /// Tool identifier, e.g. "web_search", "arxiv".
    fn tool_name(&self) -> &str;

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ToolError>;
}
