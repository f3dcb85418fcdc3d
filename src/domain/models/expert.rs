//! Expert execution models: the wire output contract, parsed results, and
//! quality-preflight reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::models::challenge::ChallengeFlag;
use crate::domain::models::report::SearchReference;

/// Mandatory handoff block inside every expert output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExpertHandoffResponse {
    /// Answers to the requirements analyst's critical questions.
    #[serde(default)]
    pub critical_questions_responses: BTreeMap<String, String>,

    /// The design stance the expert chose on the challenge spectrum.
    #[serde(default)]
    pub chosen_design_stance: String,
}

/// Names of the three mandatory wire-contract fields.
pub const REQUIRED_EXPERT_FIELDS: [&str; 3] = [
    "expert_handoff_response",
    "design_rationale",
    "challenge_flags",
];

/// Parsed output of one expert run.
///
/// The executor keeps whatever was produced even after a failed correction
/// retry; missing protocol fields are recorded in `protocol_violations`
/// rather than dropped on the floor, so the red team can flag the omission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertOutput {
    pub role_id: String,

    /// Dynamic role name at execution time, used by review agent-id matching.
    #[serde(default)]
    pub dynamic_role_name: String,

    /// Raw model text as returned (post fence-stripping).
    pub raw: String,

    /// Full parsed JSON object; extra fields beyond the contract are allowed.
    pub parsed: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff: Option<ExpertHandoffResponse>,

    /// `design_rationale` or `decision_rationale`, whichever was present.
    #[serde(default)]
    pub rationale: String,

    #[serde(default)]
    pub challenge_flags: Vec<ChallengeFlag>,

    /// Contract fields still missing after the single correction retry.
    #[serde(default)]
    pub protocol_violations: Vec<String>,

    /// Search references gathered through tool calls during this run.
    #[serde(default)]
    pub references: Vec<SearchReference>,

    /// 0 for the first execution; incremented per targeted rerun.
    #[serde(default)]
    pub rerun_round: u32,

    pub completed_at: DateTime<Utc>,
}

impl ExpertOutput {
    /// Short summary used as peer context for later batches, trimmed to
    /// `max_chars` characters.
    pub fn peer_summary(&self, max_chars: usize) -> String {
        let source = if self.rationale.is_empty() {
            &self.raw
        } else {
            &self.rationale
        };
        source.chars().take(max_chars).collect()
    }
}

/// Risk label derived from the overall risk score: low < 50, medium < 70,
/// high >= 70.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 70.0 {
            RiskLevel::High
        } else if score >= 50.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Risk assessment block of a preflight report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RiskAssessment {
    #[serde(default)]
    pub requirement_clarity: String,
    #[serde(default)]
    pub task_complexity: String,
    #[serde(default)]
    pub data_dependency: String,
    /// 0..100.
    #[serde(default)]
    pub overall_risk_score: f64,
}

/// Per-role quality preflight result. The quality checklist is injected
/// verbatim into the expert's prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub role_id: String,
    pub risk_assessment: RiskAssessment,
    #[serde(default)]
    pub risk_points: Vec<String>,
    #[serde(default)]
    pub quality_checklist: Vec<String>,
    #[serde(default)]
    pub capability_gaps: Vec<String>,
    #[serde(default)]
    pub mitigation_suggestions: Vec<String>,
    pub risk_level: RiskLevel,
}

impl PreflightReport {
    /// Default medium-risk report substituted on parse failure.
    pub fn default_medium(role_id: impl Into<String>) -> Self {
        Self {
            role_id: role_id.into(),
            risk_assessment: RiskAssessment {
                requirement_clarity: "unverified".to_string(),
                task_complexity: "unverified".to_string(),
                data_dependency: "unverified".to_string(),
                overall_risk_score: 60.0,
            },
            risk_points: vec!["风险评估解析失败，使用默认检查项".to_string()],
            quality_checklist: vec![
                "输出覆盖全部指定交付物".to_string(),
                "回应需求分析师的关键问题".to_string(),
                "结论附带可验证的依据".to_string(),
            ],
            capability_gaps: Vec::new(),
            mitigation_suggestions: Vec::new(),
            risk_level: RiskLevel::Medium,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_thresholds() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(49.9), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(50.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(69.9), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(70.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(100.0), RiskLevel::High);
    }

    #[test]
    fn test_peer_summary_trims() {
        let output = ExpertOutput {
            role_id: "V4_研究员_4-1".into(),
            dynamic_role_name: String::new(),
            raw: "x".repeat(500),
            parsed: serde_json::Value::Null,
            handoff: None,
            rationale: String::new(),
            challenge_flags: vec![],
            protocol_violations: vec![],
            references: vec![],
            rerun_round: 0,
            completed_at: Utc::now(),
        };
        assert_eq!(output.peer_summary(200).chars().count(), 200);
    }
}
