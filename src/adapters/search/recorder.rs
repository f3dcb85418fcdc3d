//! Tool-call recorder: captures every search invocation, converts hits to
//! bibliography references, and appends one JSONL line per call.

use chrono::Utc;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;
use tracing::warn;

use crate::domain::models::report::SearchReference;
use crate::domain::ports::{SearchTool, ToolCallRecord, ToolCallStatus};

/// Snippets are trimmed to this many chars at record time.
const SNIPPET_MAX_CHARS: usize = 300;

pub struct ToolCallRecorder {
    log_path: Option<PathBuf>,
    records: Mutex<Vec<ToolCallRecord>>,
}

impl ToolCallRecorder {
    pub fn new(log_path: Option<PathBuf>) -> Self {
        Self {
            log_path,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Run one search through `tool`, recording the call. A failed call is
    /// recorded with error status and yields no references.
    pub async fn search(
        &self,
        tool: &dyn SearchTool,
        query: &str,
        deliverable_id: Option<&str>,
    ) -> Vec<SearchReference> {
        let started = Instant::now();
        let result = tool.search(query).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (status, summary, references) = match result {
            Ok(hits) => {
                let references: Vec<SearchReference> = hits
                    .into_iter()
                    .map(|hit| SearchReference {
                        source_tool: tool.tool_name().to_string(),
                        title: hit.title,
                        url: hit.url,
                        snippet: hit.snippet.chars().take(SNIPPET_MAX_CHARS).collect(),
                        relevance_score: hit.relevance_score,
                        deliverable_id: deliverable_id.map(str::to_string),
                        query: query.to_string(),
                        timestamp: Utc::now(),
                    })
                    .collect();
                (
                    ToolCallStatus::Success,
                    format!("{} hits", references.len()),
                    references,
                )
            }
            Err(e) => (ToolCallStatus::Error, e.to_string(), Vec::new()),
        };

        let record = ToolCallRecord {
            tool_name: tool.tool_name().to_string(),
            input: query.to_string(),
            output_summary: summary,
            duration_ms,
            status,
            timestamp: Utc::now(),
        };
        self.append(&record);
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
        references
    }

    pub fn records(&self) -> Vec<ToolCallRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn append(&self, record: &ToolCallRecord) {
        let Some(path) = &self.log_path else { return };
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "tool-call record not serializable");
                return;
            }
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "tool-call log append failed");
        }
    }
}
