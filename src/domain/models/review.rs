//! Review-round models: red/blue debate, client review, and the rerun
//! feedback package handed back to experts.
//!
//! Schema version 2: the legacy "judge" phase is gone; the blue team filters
//! false positives and the client makes the final call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::role::Priority;

pub const REVIEW_SCHEMA_VERSION: u32 = 2;

/// One red-team finding. `issue_id` is review-round-local and shared across
/// red/blue/client so rulings can reference debated items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedIssue {
    pub issue_id: String,
    /// Best-effort matched dynamic role id of the expert concerned.
    pub agent_id: String,
    pub issue: String,
    #[serde(default)]
    pub expected: String,
    #[serde(default)]
    pub priority: Priority,
}

/// Blue-team stance on one red finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlueStance {
    Agree,
    Disagree,
    PartiallyAgree,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueValidation {
    pub issue_id: String,
    pub stance: BlueStance,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub improvement_suggestion: String,
}

/// Positive observation emitted alongside validations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strength {
    pub agent_id: String,
    pub dimension: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RedTeamReport {
    #[serde(default)]
    pub improvements: Vec<RedIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BlueTeamReport {
    #[serde(default)]
    pub validations: Vec<BlueValidation>,
    #[serde(default)]
    pub strengths: Vec<Strength>,
}

/// Outcome of merging red findings with blue validations: `disagree`
/// stances drop the finding as a false positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RedBlueDebate {
    #[serde(default)]
    pub validated_issues: Vec<RedIssue>,
    #[serde(default)]
    pub filtered_issues: Vec<RedIssue>,
}

/// Client-side business priority for an accepted improvement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessPriority {
    MustFix,
    ShouldFix,
    NiceToHave,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedImprovement {
    pub issue_id: String,
    pub business_priority: BusinessPriority,
    #[serde(default)]
    pub deadline: String,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedImprovement {
    pub issue_id: String,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClientReview {
    #[serde(default)]
    pub accepted_improvements: Vec<AcceptedImprovement>,
    #[serde(default)]
    pub rejected_improvements: Vec<RejectedImprovement>,
    #[serde(default)]
    pub final_decision: String,
}

/// Problem-driven review decision; the coordinator returns `Approve` no
/// later than round 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    RerunSpecific { agent_ids: Vec<String> },
}

/// Full record of one review round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewResult {
    pub schema_version: u32,
    pub round: u32,
    pub red_blue_debate: RedBlueDebate,
    pub client_review: ClientReview,
    pub final_ruling: String,
    #[serde(default)]
    pub improvement_suggestions: Vec<String>,
    pub decision: ReviewDecision,
    pub timestamp: DateTime<Utc>,
}

impl ReviewResult {
    pub fn approved(round: u32, ruling: impl Into<String>) -> Self {
        Self {
            schema_version: REVIEW_SCHEMA_VERSION,
            round,
            red_blue_debate: RedBlueDebate::default(),
            client_review: ClientReview::default(),
            final_ruling: ruling.into(),
            improvement_suggestions: Vec::new(),
            decision: ReviewDecision::Approve,
            timestamp: Utc::now(),
        }
    }
}

/// One concrete correction task inside the rerun feedback package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackTask {
    pub instruction: String,
    #[serde(default)]
    pub example: String,
    #[serde(default)]
    pub validation: String,
    #[serde(default)]
    pub priority: Priority,
}

/// Structured feedback injected into an expert's prompt on targeted rerun.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReviewFeedback {
    pub round: u32,
    #[serde(default)]
    pub previous_output_summary: String,
    #[serde(default)]
    pub what_worked: Vec<String>,
    #[serde(default)]
    pub needs_improvement: Vec<String>,
    #[serde(default)]
    pub specific_tasks: Vec<FeedbackTask>,
    /// Aspects of the previous output to keep intact.
    #[serde(default)]
    pub avoid_changes_to: Vec<String>,
}
