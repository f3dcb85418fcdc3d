//! Session state: the single shared record carried through every stage.
//!
//! Fields are additive; no stage deletes another's fields. `StateDelta`
//! encodes what a node wants changed and `SessionState::apply` implements
//! the fixed merge policy per field class: scalars last-writer-wins,
//! monotone flags boolean-OR, lists append, maps merge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::domain::models::challenge::{
    AcceptedInsight, EscalatedChallenge, FrameworkSynthesis, InsightUpdate,
};
use crate::domain::models::expert::{ExpertOutput, PreflightReport};
use crate::domain::models::feasibility::FeasibilityAssessment;
use crate::domain::models::questionnaire::{Questionnaire, QuestionnaireSummary};
use crate::domain::models::report::{FinalReport, SearchReference};
use crate::domain::models::requirements::StructuredRequirements;
use crate::domain::models::review::ReviewResult;
use crate::domain::models::role::{Role, TaskInstruction};

/// Node identifiers of the stage graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Start,
    RequirementsAnalyst,
    RequirementsConfirmation,
    CalibrationQuestionnaire,
    FeasibilityAnalyst,
    ProjectDirector,
    RoleTaskUnifiedReview,
    QualityPreflight,
    BatchExecutor,
    ChallengeDetection,
    ReviewCoordinator,
    ResultAggregator,
    UserQuestion,
    End,
}

impl WorkflowStage {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStage::Start => "start",
            WorkflowStage::RequirementsAnalyst => "requirements_analyst",
            WorkflowStage::RequirementsConfirmation => "requirements_confirmation",
            WorkflowStage::CalibrationQuestionnaire => "calibration_questionnaire",
            WorkflowStage::FeasibilityAnalyst => "feasibility_analyst",
            WorkflowStage::ProjectDirector => "project_director",
            WorkflowStage::RoleTaskUnifiedReview => "role_task_unified_review",
            WorkflowStage::QualityPreflight => "quality_preflight",
            WorkflowStage::BatchExecutor => "batch_executor",
            WorkflowStage::ChallengeDetection => "challenge_detection",
            WorkflowStage::ReviewCoordinator => "review_coordinator",
            WorkflowStage::ResultAggregator => "result_aggregator",
            WorkflowStage::UserQuestion => "user_question",
            WorkflowStage::End => "end",
        }
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse lifecycle stage, mirrored into checkpoints for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStage {
    #[default]
    Created,
    Requirements,
    Calibration,
    Feasibility,
    RoleSelection,
    Preflight,
    ExpertExecution,
    ChallengeResolution,
    Review,
    Aggregation,
    Completed,
}

/// Project director output: selected roles plus their task distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StrategicAnalysis {
    pub selected_roles: Vec<Role>,
    /// Task instruction per role id.
    pub task_distribution: BTreeMap<String, TaskInstruction>,
    #[serde(default)]
    pub reasoning: String,
    /// True when the safe default selection replaced a failed LLM selection.
    #[serde(default)]
    pub fallback_used: bool,
}

impl StrategicAnalysis {
    pub fn role_ids(&self) -> Vec<String> {
        self.selected_roles.iter().map(|r| r.role_id.clone()).collect()
    }

    pub fn role(&self, role_id: &str) -> Option<&Role> {
        self.selected_roles.iter().find(|r| r.role_id == role_id)
    }
}

/// Bookkeeping record of one completed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    /// 1-based batch number.
    pub batch_number: usize,
    pub role_ids: Vec<String>,
    pub succeeded: usize,
    pub failed: usize,
    pub completed_at: DateTime<Utc>,
}

/// Append-only interaction log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEntry {
    pub timestamp: DateTime<Utc>,
    /// `user`, `system`, or `agent:<node>`.
    pub actor: String,
    /// `suspend`, `resume`, `note`.
    pub kind: String,
    pub summary: String,
}

impl InteractionEntry {
    pub fn now(actor: impl Into<String>, kind: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            actor: actor.into(),
            kind: kind.into(),
            summary: summary.into(),
        }
    }
}

/// The full session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    // Identity & lifecycle
    pub session_id: Uuid,
    pub current_stage: WorkflowStage,
    pub analysis_stage: AnalysisStage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Completion timestamp per stage name.
    #[serde(default)]
    pub stage_timestamps: BTreeMap<String, DateTime<Utc>>,

    // User input & artifacts
    pub user_input: String,
    #[serde(default)]
    pub structured_requirements: Option<StructuredRequirements>,
    #[serde(default)]
    pub confirmed_core_tasks: Vec<String>,
    #[serde(default)]
    pub calibration_questionnaire: Option<Questionnaire>,
    #[serde(default)]
    pub questionnaire_summary: Option<QuestionnaireSummary>,
    #[serde(default)]
    pub feasibility_assessment: Option<FeasibilityAssessment>,
    #[serde(default)]
    pub strategic_analysis: Option<StrategicAnalysis>,
    #[serde(default)]
    pub preflight_reports: BTreeMap<String, PreflightReport>,
    #[serde(default)]
    pub agent_results: BTreeMap<String, ExpertOutput>,
    #[serde(default)]
    pub batch_results: Vec<BatchRecord>,
    #[serde(default)]
    pub review_result: Option<ReviewResult>,
    #[serde(default)]
    pub review_history: Vec<ReviewResult>,
    #[serde(default)]
    pub final_report: Option<FinalReport>,
    #[serde(default)]
    pub search_references: Vec<SearchReference>,

    // Monotonic control flags
    #[serde(default)]
    pub calibration_processed: bool,
    #[serde(default)]
    pub requirements_confirmed: bool,
    #[serde(default)]
    pub role_selection_approved: bool,
    #[serde(default)]
    pub task_assignment_approved: bool,
    #[serde(default)]
    pub batch_strategy_approved: bool,
    #[serde(default)]
    pub quality_preflight_completed: bool,
    #[serde(default)]
    pub is_followup: bool,
    #[serde(default)]
    pub has_user_modifications: bool,
    #[serde(default)]
    pub user_modification_processed: bool,
    #[serde(default)]
    pub feedback_loop_processed: bool,
    #[serde(default)]
    pub synthesis_required: bool,
    #[serde(default)]
    pub has_competing_frameworks: bool,
    #[serde(default)]
    pub requires_client_review: bool,
    #[serde(default)]
    pub requires_feedback_loop: bool,
    #[serde(default)]
    pub degraded: bool,
    #[serde(default)]
    pub skip_questionnaire: bool,
    #[serde(default)]
    pub skip_review: bool,

    // Batching
    #[serde(default)]
    pub execution_batches: Vec<Vec<String>>,
    /// 1-based; `current_batch > total_batches` means all batches complete.
    #[serde(default = "default_current_batch")]
    pub current_batch: usize,
    #[serde(default)]
    pub total_batches: usize,
    #[serde(default)]
    pub completed_batches: usize,

    // Challenge bookkeeping
    #[serde(default)]
    pub expert_driven_insights: BTreeMap<String, AcceptedInsight>,
    #[serde(default)]
    pub framework_synthesis: BTreeMap<String, FrameworkSynthesis>,
    #[serde(default)]
    pub escalated_challenges: Vec<EscalatedChallenge>,
    #[serde(default)]
    pub insight_updates: Vec<InsightUpdate>,
    #[serde(default)]
    pub total_challenges_detected: usize,

    // Review bookkeeping
    #[serde(default)]
    pub review_round: u32,

    // Tool enablement per role id, adjustable at the unified review gate.
    #[serde(default)]
    pub tool_settings: BTreeMap<String, bool>,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub interaction_history: Vec<InteractionEntry>,
}

fn default_current_batch() -> usize {
    1
}

impl SessionState {
    pub fn new(user_input: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            current_stage: WorkflowStage::Start,
            analysis_stage: AnalysisStage::Created,
            created_at: now,
            updated_at: now,
            stage_timestamps: BTreeMap::new(),
            user_input: user_input.into(),
            structured_requirements: None,
            confirmed_core_tasks: Vec::new(),
            calibration_questionnaire: None,
            questionnaire_summary: None,
            feasibility_assessment: None,
            strategic_analysis: None,
            preflight_reports: BTreeMap::new(),
            agent_results: BTreeMap::new(),
            batch_results: Vec::new(),
            review_result: None,
            review_history: Vec::new(),
            final_report: None,
            search_references: Vec::new(),
            calibration_processed: false,
            requirements_confirmed: false,
            role_selection_approved: false,
            task_assignment_approved: false,
            batch_strategy_approved: false,
            quality_preflight_completed: false,
            is_followup: false,
            has_user_modifications: false,
            user_modification_processed: false,
            feedback_loop_processed: false,
            synthesis_required: false,
            has_competing_frameworks: false,
            requires_client_review: false,
            requires_feedback_loop: false,
            degraded: false,
            skip_questionnaire: false,
            skip_review: false,
            execution_batches: Vec::new(),
            current_batch: 1,
            total_batches: 0,
            completed_batches: 0,
            expert_driven_insights: BTreeMap::new(),
            framework_synthesis: BTreeMap::new(),
            escalated_challenges: Vec::new(),
            insight_updates: Vec::new(),
            total_challenges_detected: 0,
            review_round: 0,
            tool_settings: BTreeMap::new(),
            error: None,
            interaction_history: Vec::new(),
        }
    }

    /// Roles of the batch at 1-based index `n`, empty when out of range.
    pub fn batch_roles(&self, n: usize) -> &[String] {
        if n == 0 || n > self.execution_batches.len() {
            &[]
        } else {
            &self.execution_batches[n - 1]
        }
    }

    /// All batches complete.
    pub fn batches_complete(&self) -> bool {
        self.total_batches == 0 || self.current_batch > self.total_batches
    }

    /// Are tools enabled for a role? Defaults to false when unset.
    pub fn tools_enabled(&self, role_id: &str) -> bool {
        self.tool_settings.get(role_id).copied().unwrap_or(false)
    }

    /// Apply a node's state delta under the fixed merge policy.
    pub fn apply(&mut self, delta: StateDelta) {
        // Scalars: last-writer-wins.
        if let Some(v) = delta.analysis_stage {
            self.analysis_stage = v;
        }
        if let Some(v) = delta.structured_requirements {
            self.structured_requirements = Some(v);
        }
        if let Some(v) = delta.confirmed_core_tasks {
            self.confirmed_core_tasks = v;
        }
        if let Some(v) = delta.calibration_questionnaire {
            self.calibration_questionnaire = Some(v);
        }
        if let Some(v) = delta.questionnaire_summary {
            self.questionnaire_summary = Some(v);
        }
        if let Some(v) = delta.feasibility_assessment {
            self.feasibility_assessment = Some(v);
        }
        if let Some(v) = delta.strategic_analysis {
            self.strategic_analysis = Some(v);
        }
        if let Some(v) = delta.review_result {
            self.review_history.push(v.clone());
            self.review_result = Some(v);
        }
        if let Some(v) = delta.final_report {
            self.final_report = Some(v);
        }
        if let Some(v) = delta.execution_batches {
            self.execution_batches = v;
        }
        if let Some(v) = delta.current_batch {
            self.current_batch = v;
        }
        if let Some(v) = delta.total_batches {
            self.total_batches = v;
        }
        if let Some(v) = delta.completed_batches {
            self.completed_batches = v;
        }
        if let Some(v) = delta.review_round {
            self.review_round = v;
        }
        if let Some(v) = delta.error {
            self.error = Some(v);
        }

        // Raw input accumulates; clarifications are appended across rounds.
        if let Some(v) = delta.user_input_append {
            if !self.user_input.is_empty() {
                self.user_input.push('\n');
            }
            self.user_input.push_str(&v);
        }

        // Monotone flags: boolean-OR, never reset.
        self.calibration_processed |= delta.calibration_processed;
        self.requirements_confirmed |= delta.requirements_confirmed;
        self.role_selection_approved |= delta.role_selection_approved;
        self.task_assignment_approved |= delta.task_assignment_approved;
        self.batch_strategy_approved |= delta.batch_strategy_approved;
        self.quality_preflight_completed |= delta.quality_preflight_completed;
        self.is_followup |= delta.is_followup;
        self.has_user_modifications |= delta.has_user_modifications;
        self.user_modification_processed |= delta.user_modification_processed;
        self.feedback_loop_processed |= delta.feedback_loop_processed;
        self.synthesis_required |= delta.synthesis_required;
        self.has_competing_frameworks |= delta.has_competing_frameworks;
        self.requires_client_review |= delta.requires_client_review;
        self.requires_feedback_loop |= delta.requires_feedback_loop;
        self.degraded |= delta.degraded;
        self.skip_questionnaire |= delta.skip_questionnaire;
        self.skip_review |= delta.skip_review;

        // Maps: per-key merge (new keys added, same key last-writer-wins).
        self.preflight_reports.extend(delta.preflight_reports);
        self.agent_results.extend(delta.agent_results);
        self.expert_driven_insights.extend(delta.expert_driven_insights);
        self.framework_synthesis.extend(delta.framework_synthesis);
        self.tool_settings.extend(delta.tool_settings);
        self.stage_timestamps.extend(delta.stage_timestamps);

        // Lists: append-only.
        self.batch_results.extend(delta.batch_results);
        self.escalated_challenges.extend(delta.escalated_challenges);
        self.insight_updates.extend(delta.insight_updates);
        self.search_references.extend(delta.search_references);
        self.interaction_history.extend(delta.interaction_history);

        // Counters: additive.
        self.total_challenges_detected += delta.challenges_detected;

        // Escalation rulings update existing entries in place, keyed by
        // challenged item.
        for (item, ruling) in delta.escalation_rulings {
            for esc in &mut self.escalated_challenges {
                if esc.flag.challenged_item == item {
                    esc.ruling = Some(ruling.clone());
                }
            }
        }

        self.updated_at = Utc::now();
    }
}

/// A node's requested state change. All fields default to "no change".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDelta {
    pub analysis_stage: Option<AnalysisStage>,
    pub user_input_append: Option<String>,
    pub structured_requirements: Option<StructuredRequirements>,
    pub confirmed_core_tasks: Option<Vec<String>>,
    pub calibration_questionnaire: Option<Questionnaire>,
    pub questionnaire_summary: Option<QuestionnaireSummary>,
    pub feasibility_assessment: Option<FeasibilityAssessment>,
    pub strategic_analysis: Option<StrategicAnalysis>,
    pub review_result: Option<ReviewResult>,
    pub final_report: Option<FinalReport>,
    pub execution_batches: Option<Vec<Vec<String>>>,
    pub current_batch: Option<usize>,
    pub total_batches: Option<usize>,
    pub completed_batches: Option<usize>,
    pub review_round: Option<u32>,
    pub error: Option<String>,

    pub calibration_processed: bool,
    pub requirements_confirmed: bool,
    pub role_selection_approved: bool,
    pub task_assignment_approved: bool,
    pub batch_strategy_approved: bool,
    pub quality_preflight_completed: bool,
    pub is_followup: bool,
    pub has_user_modifications: bool,
    pub user_modification_processed: bool,
    pub feedback_loop_processed: bool,
    pub synthesis_required: bool,
    pub has_competing_frameworks: bool,
    pub requires_client_review: bool,
    pub requires_feedback_loop: bool,
    pub degraded: bool,
    pub skip_questionnaire: bool,
    pub skip_review: bool,

    pub preflight_reports: BTreeMap<String, PreflightReport>,
    pub agent_results: BTreeMap<String, ExpertOutput>,
    pub expert_driven_insights: BTreeMap<String, AcceptedInsight>,
    pub framework_synthesis: BTreeMap<String, FrameworkSynthesis>,
    pub tool_settings: BTreeMap<String, bool>,
    pub stage_timestamps: BTreeMap<String, DateTime<Utc>>,

    pub batch_results: Vec<BatchRecord>,
    pub escalated_challenges: Vec<EscalatedChallenge>,
    pub insight_updates: Vec<InsightUpdate>,
    pub search_references: Vec<SearchReference>,
    pub interaction_history: Vec<InteractionEntry>,

    pub challenges_detected: usize,
    pub escalation_rulings: BTreeMap<String, String>,
}

impl StateDelta {
    /// Delta that records a stage completion timestamp.
    pub fn stamp(stage: WorkflowStage) -> Self {
        let mut delta = Self::default();
        delta
            .stage_timestamps
            .insert(stage.as_str().to_string(), Utc::now());
        delta
    }

    pub fn with_log(mut self, entry: InteractionEntry) -> Self {
        self.interaction_history.push(entry);
        self
    }
}
