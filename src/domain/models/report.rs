//! Final report models and the search-reference bibliography.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One bibliography entry produced from a recorded search-tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReference {
    pub source_tool: String,
    pub title: String,
    pub url: String,
    /// Trimmed to 300 chars at record time.
    pub snippet: String,
    pub relevance_score: f64,
    /// Short deliverable id (`2-1`) the search supported, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliverable_id: Option<String>,
    pub query: String,
    pub timestamp: DateTime<Utc>,
}

/// Summary of how all detected challenges closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChallengeResolutions {
    pub accepted: Vec<String>,
    pub synthesized: Vec<String>,
    pub escalated: Vec<String>,
    /// Closed-challenge share; 1.0 when no challenges were detected.
    pub closure_rate: f64,
}

impl ChallengeResolutions {
    pub fn total(&self) -> usize {
        self.accepted.len() + self.synthesized.len() + self.escalated.len()
    }
}

/// Report-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReportMetadata {
    pub review_rounds: u32,
    /// 0..1 aggregator confidence.
    pub confidence: f64,
    pub generated_at: Option<DateTime<Utc>>,
}

/// The structured final report.
///
/// On schema-validation failure the aggregator fills missing sections with
/// safe defaults and marks the report `partial`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FinalReport {
    #[serde(default)]
    pub executive_summary: String,

    /// Per-role deliverable write-ups keyed by role id.
    #[serde(default)]
    pub role_deliverables: BTreeMap<String, String>,

    #[serde(default)]
    pub final_ruling: String,

    #[serde(default)]
    pub challenge_resolutions: ChallengeResolutions,

    #[serde(default)]
    pub bibliography: Vec<SearchReference>,

    #[serde(default)]
    pub metadata: ReportMetadata,

    #[serde(default)]
    pub partial: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_resolution_totals() {
        let res = ChallengeResolutions {
            accepted: vec!["a".into()],
            synthesized: vec!["b".into()],
            escalated: vec!["c".into(), "d".into()],
            closure_rate: 0.5,
        };
        assert_eq!(res.total(), 4);
    }

    #[test]
    fn test_final_report_default_is_not_partial() {
        let report = FinalReport::default();
        assert!(!report.partial);
        assert!(report.role_deliverables.is_empty());
    }
}
