//! Dynamic project director: selects the expert team over the fixed V2-V6
//! dependency families, distributes tasks, validates the allocation, and
//! plans the execution batches.
//!
//! Selection runs up to three LLM attempts; every parse failure or hard
//! validation error feeds a corrective note into the next attempt. When all
//! attempts fail a safe default team is substituted and the event is written
//! to the fallback log.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agents::{AgentNode, NodeOutcome};
use crate::catalog::constraints::ConstraintCatalog;
use crate::catalog::prompts::PromptCatalog;
use crate::catalog::roles::RoleCatalog;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::interrupt::ResumeValue;
use crate::domain::models::role::{BaseType, DeliverableSpec, Role, TaskInstruction};
use crate::domain::models::session::{
    AnalysisStage, InteractionEntry, SessionState, StateDelta, StrategicAnalysis, WorkflowStage,
};
use crate::domain::ports::{ChatModel, ChatRequest};
use crate::infrastructure::fallback::{FallbackEvent, FallbackRecorder};
use crate::services::batch_scheduler::BatchScheduler;
use crate::services::capability::CapabilityBoundaryService;
use crate::services::output::extract_json;
use crate::services::retry::RetryPolicy;
use crate::services::role_weights::RoleWeightCalculator;

const MAX_SELECTION_ATTEMPTS: u32 = 3;

/// Lower bound of the selection contract; the upper bound is a soft
/// warning in the constraint catalog.
const MIN_SELECTED_ROLES: usize = 3;

/// Expected deliverable range for design-director (V2) roles.
const V2_DELIVERABLE_RANGE: std::ops::RangeInclusive<usize> = 4..=6;

/// Deliverable counts must spread at least this much across roles; a flat
/// allocation means the director did not differentiate task volume.
const DIFFERENTIATION_STDDEV_FLOOR: f64 = 0.8;

/// Minimum share of confirmed core tasks that must surface in deliverables.
const TASK_ALIGNMENT_FLOOR: f64 = 0.4;

pub struct ProjectDirectorAgent {
    model: Arc<dyn ChatModel>,
    prompts: Arc<PromptCatalog>,
    roles: Arc<RoleCatalog>,
    constraints: Arc<ConstraintCatalog>,
    weights: RoleWeightCalculator,
    fallback: Arc<FallbackRecorder>,
    retry: RetryPolicy,
}

/// Wire shape of the director response.
#[derive(Debug, Deserialize)]
struct DirectorWire {
    #[serde(default)]
    selected_roles: Vec<WireRole>,
    #[serde(default)]
    task_distribution: BTreeMap<String, WireTask>,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireRole {
    Id(String),
    Object {
        role_id: String,
        #[serde(default)]
        dynamic_role_name: String,
    },
}

/// Current task format, or the legacy `{tasks, expected_output, focus_areas}`
/// shape still produced by older prompt revisions.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTask {
    Legacy {
        tasks: Vec<String>,
        #[serde(default)]
        expected_output: String,
        #[serde(default)]
        focus_areas: Vec<String>,
    },
    Modern(TaskInstruction),
}

impl WireTask {
    fn into_instruction(self, slot: &str) -> TaskInstruction {
        match self {
            WireTask::Modern(task) => task,
            WireTask::Legacy {
                tasks,
                expected_output,
                focus_areas,
            } => TaskInstruction {
                objective: if expected_output.is_empty() {
                    tasks.join("；")
                } else {
                    expected_output
                },
                deliverables: tasks
                    .into_iter()
                    .map(|name| {
                        let mut spec = DeliverableSpec::new(slot, name);
                        spec.success_criteria = focus_areas.clone();
                        spec
                    })
                    .collect(),
                success_criteria: focus_areas,
                ..Default::default()
            },
        }
    }
}

impl ProjectDirectorAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: Arc<dyn ChatModel>,
        prompts: Arc<PromptCatalog>,
        roles: Arc<RoleCatalog>,
        constraints: Arc<ConstraintCatalog>,
        weights: RoleWeightCalculator,
        fallback: Arc<FallbackRecorder>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            model,
            prompts,
            roles,
            constraints,
            weights,
            fallback,
            retry,
        }
    }

    async fn select(&self, state: &SessionState) -> EngineResult<(StrategicAnalysis, Vec<String>)> {
        let brief = state
            .structured_requirements
            .as_ref()
            .ok_or(EngineError::MissingState("structured_requirements"))?;

        let weights = self.weights.compute(brief, &state.user_input);
        let candidates: Vec<&Role> = self.roles.for_scope(brief.project_scope());
        let mut corrective: Option<String> = None;

        for attempt in 1..=MAX_SELECTION_ATTEMPTS {
            match self
                .attempt(state, &weights, &candidates, corrective.as_deref())
                .await
            {
                Ok(mut analysis) => {
                    let mut notes = quality_warnings(&analysis, &state.confirmed_core_tasks);
                    notes.extend(CapabilityBoundaryService::annotate(&mut analysis));

                    let pairs: Vec<(DeliverableSpec, String)> = analysis
                        .task_distribution
                        .iter()
                        .flat_map(|(role_id, task)| {
                            task.deliverables
                                .iter()
                                .map(move |d| (d.clone(), role_id.clone()))
                        })
                        .collect();
                    let check = self
                        .constraints
                        .validate_allocation(&pairs, &analysis.selected_roles);
                    notes.extend(check.warnings.clone());
                    if !check.is_valid() {
                        warn!(attempt, errors = ?check.errors, "allocation rejected");
                        corrective = Some(format!(
                            "上一轮分配违反了硬性约束，必须修正：{}",
                            check.errors.join("；")
                        ));
                        continue;
                    }

                    for note in &notes {
                        warn!(attempt, note, "selection quality note");
                    }
                    return Ok((analysis, notes));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "director selection attempt failed");
                    corrective = Some(format!("上一轮输出无法采用（{e}），请严格按 JSON 结构重新输出"));
                }
            }
        }

        self.fallback.record(&FallbackEvent::new(
            state.session_id,
            "project_director",
            corrective.unwrap_or_else(|| "selection failed".to_string()),
            MAX_SELECTION_ATTEMPTS,
        ));
        Ok((
            self.fallback_selection(brief.project_task.clone()),
            vec!["已降级为默认专家团队".to_string()],
        ))
    }

    async fn attempt(
        &self,
        state: &SessionState,
        weights: &BTreeMap<BaseType, f64>,
        candidates: &[&Role],
        corrective: Option<&str>,
    ) -> EngineResult<StrategicAnalysis> {
        let config = self.prompts.get("dynamic_project_director_v2")?;
        let brief = state
            .structured_requirements
            .as_ref()
            .ok_or(EngineError::MissingState("structured_requirements"))?;

        let catalog: Vec<_> = candidates
            .iter()
            .map(|r| {
                json!({
                    "role_id": r.role_id,
                    "role_name": r.role_name,
                    "description": r.description,
                    "keywords": r.keywords,
                })
            })
            .collect();
        let mut user = format!(
            "结构化简报：{}\n\n可选专家池：{}\n\n角色家族权重：{}\n",
            serde_json::to_string_pretty(brief)?,
            serde_json::to_string_pretty(&catalog)?,
            serde_json::to_string(
                &weights
                    .iter()
                    .map(|(k, v)| (k.as_str().to_string(), *v))
                    .collect::<BTreeMap<_, _>>()
            )?,
        );
        if let Some(assessment) = &state.feasibility_assessment {
            user.push_str(&format!(
                "\n可行性评估：{}\n",
                serde_json::to_string(assessment)?
            ));
        }
        if let Some(summary) = &state.questionnaire_summary {
            if !summary.summary_text.is_empty() {
                user.push_str(&format!("\n校准问卷摘要：{}\n", summary.summary_text));
            }
        }
        if let Some(corrective) = corrective {
            user.push_str(&format!("\n【修正要求】{corrective}\n"));
        }

        let request = ChatRequest::new(config.effective_prompt().unwrap_or_default(), user);
        let response = self
            .retry
            .execute(|| self.model.complete(request.clone()))
            .await?;
        let value = extract_json(&response.content).ok_or_else(|| {
            EngineError::ValidationFailed("director response is not JSON".to_string())
        })?;
        let wire: DirectorWire = serde_json::from_value(value)?;

        self.materialize(wire)
    }

    /// Resolve wire role ids against the catalog and attach task instructions.
    fn materialize(&self, wire: DirectorWire) -> EngineResult<StrategicAnalysis> {
        let mut selected: Vec<Role> = Vec::new();
        for entry in wire.selected_roles {
            let (id, dynamic_name) = match entry {
                WireRole::Id(id) => (id, String::new()),
                WireRole::Object {
                    role_id,
                    dynamic_role_name,
                } => (role_id, dynamic_role_name),
            };
            let Some(full_id) = self.roles.normalize_role_id(&id) else {
                warn!(role_id = %id, "unknown role id dropped from selection");
                continue;
            };
            if selected.iter().any(|r| r.role_id == full_id) {
                continue;
            }
            let mut role = self
                .roles
                .by_id(&full_id)
                .ok_or_else(|| EngineError::Internal(format!("catalog lost role {full_id}")))?
                .clone();
            role.dynamic_role_name = dynamic_name;
            selected.push(role);
        }

        if selected.len() < MIN_SELECTED_ROLES {
            return Err(EngineError::ValidationFailed(format!(
                "director selected {} usable roles; at least {MIN_SELECTED_ROLES} required",
                selected.len()
            )));
        }
        if !selected.iter().any(|r| r.base_type == BaseType::V4) {
            return Err(EngineError::ValidationFailed(
                "selection is missing a V4 research role".to_string(),
            ));
        }

        let mut task_distribution = BTreeMap::new();
        for (id, task) in wire.task_distribution {
            let Some(full_id) = self.roles.normalize_role_id(&id) else {
                warn!(role_id = %id, "task assigned to unknown role dropped");
                continue;
            };
            if !selected.iter().any(|r| r.role_id == full_id) {
                warn!(role_id = %full_id, "task assigned to unselected role dropped");
                continue;
            }
            let slot = crate::domain::models::role::short_deliverable_id(&full_id);
            task_distribution.insert(full_id, task.into_instruction(&slot));
        }

        for role in &mut selected {
            role.task_instruction = task_distribution.get(&role.role_id).cloned();
        }
        if selected.iter().any(|r| r.task_instruction.is_none()) {
            return Err(EngineError::ValidationFailed(
                "selection contains roles with no task instruction".to_string(),
            ));
        }

        Ok(StrategicAnalysis {
            selected_roles: selected,
            task_distribution,
            reasoning: wire.reasoning,
            fallback_used: false,
        })
    }

    /// Safe default team: the first catalog role of each core family, with
    /// template tasks derived from the project brief.
    fn fallback_selection(&self, project_task: String) -> StrategicAnalysis {
        let mut selected = Vec::new();
        let mut task_distribution = BTreeMap::new();
        for base in [BaseType::V4, BaseType::V3, BaseType::V2, BaseType::V6] {
            let Some(role) = self.roles.first_of(base) else {
                continue;
            };
            let mut role = role.clone();
            let slot = role.slot();
            let task = TaskInstruction {
                objective: format!("{project_task}：{}", role.description),
                deliverables: vec![DeliverableSpec::new(
                    slot,
                    format!("{}分析", role.role_name),
                )],
                ..Default::default()
            };
            role.task_instruction = Some(task.clone());
            task_distribution.insert(role.role_id.clone(), task);
            selected.push(role);
        }
        StrategicAnalysis {
            selected_roles: selected,
            task_distribution,
            reasoning: "LLM 选型失败，使用默认专家团队。".to_string(),
            fallback_used: true,
        }
    }
}

/// Soft quality checks on a parsed selection. Warnings only; nothing here
/// rejects the allocation.
fn quality_warnings(analysis: &StrategicAnalysis, confirmed_tasks: &[String]) -> Vec<String> {
    let mut notes = Vec::new();

    for role in &analysis.selected_roles {
        if role.base_type == BaseType::V2
            && !V2_DELIVERABLE_RANGE.contains(&role.deliverable_count())
        {
            notes.push(format!(
                "V2 角色 {} 交付物数量 {} 超出常规区间 4-6",
                role.role_id,
                role.deliverable_count()
            ));
        }
    }

    let counts: Vec<f64> = analysis
        .selected_roles
        .iter()
        .map(|r| r.deliverable_count() as f64)
        .collect();
    if counts.len() > 1 {
        let mean = counts.iter().sum::<f64>() / counts.len() as f64;
        let variance =
            counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / counts.len() as f64;
        if variance.sqrt() < DIFFERENTIATION_STDDEV_FLOOR {
            notes.push(format!(
                "交付物数量缺乏差异化（标准差 {:.2}，低于 {DIFFERENTIATION_STDDEV_FLOOR}）",
                variance.sqrt()
            ));
        }
    }

    if !confirmed_tasks.is_empty() {
        let haystack: String = analysis
            .task_distribution
            .values()
            .flat_map(|t| t.deliverables.iter())
            .map(|d| format!("{} {} ", d.name, d.description))
            .chain(analysis.task_distribution.values().map(|t| t.objective.clone()))
            .collect();
        let aligned = confirmed_tasks
            .iter()
            .filter(|task| {
                task.split(|c: char| c.is_whitespace() || "，。、；：".contains(c))
                    .filter(|f| f.chars().count() >= 2)
                    .any(|f| haystack.contains(f))
            })
            .count();
        let coverage = aligned as f64 / confirmed_tasks.len() as f64;
        if coverage < TASK_ALIGNMENT_FLOOR {
            notes.push(format!(
                "已确认核心任务与交付物的对齐率仅 {:.0}%",
                coverage * 100.0
            ));
        }
    }

    notes
}

#[async_trait]
impl AgentNode for ProjectDirectorAgent {
    fn id(&self) -> WorkflowStage {
        WorkflowStage::ProjectDirector
    }

    async fn run(
        &self,
        state: &SessionState,
        _resume: Option<&ResumeValue>,
    ) -> EngineResult<NodeOutcome> {
        let (analysis, notes) = self.select(state).await?;
        let role_ids = analysis.role_ids();
        let batches = BatchScheduler::plan(&role_ids)?;
        info!(
            session = %state.session_id,
            roles = role_ids.len(),
            batches = batches.len(),
            fallback = analysis.fallback_used,
            "expert team selected"
        );

        let mut delta = StateDelta::stamp(WorkflowStage::ProjectDirector).with_log(
            InteractionEntry::now(
                "agent:project_director",
                "note",
                format!("选定 {} 位专家，共 {} 个批次", role_ids.len(), batches.len()),
            ),
        );
        for note in notes {
            delta
                .interaction_history
                .push(InteractionEntry::now("system", "note", note));
        }
        delta.analysis_stage = Some(AnalysisStage::RoleSelection);
        delta.strategic_analysis = Some(analysis);
        delta.total_batches = Some(batches.len());
        delta.current_batch = Some(1);
        delta.execution_batches = Some(batches);
        // The batch plan is derived, not negotiated; the strategy gate is
        // auto-approved and review happens at the unified gate.
        delta.batch_strategy_approved = true;
        Ok(NodeOutcome::advance(delta, WorkflowStage::RoleTaskUnifiedReview))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::llm::mock::MockChatModel;
    use crate::catalog::weights::WeightsConfig;
    use crate::domain::models::requirements::StructuredRequirements;

    fn agent_with(model: MockChatModel) -> ProjectDirectorAgent {
        ProjectDirectorAgent::new(
            Arc::new(model),
            Arc::new(PromptCatalog::builtin()),
            Arc::new(RoleCatalog::builtin()),
            Arc::new(ConstraintCatalog::builtin()),
            RoleWeightCalculator::new(WeightsConfig::builtin()),
            Arc::new(FallbackRecorder::disabled()),
            RetryPolicy::new(1, 1, 2),
        )
    }

    fn state() -> SessionState {
        let mut state = SessionState::new("深圳200㎡住宅，现代极简");
        state.structured_requirements = Some(StructuredRequirements {
            project_task: "深圳200㎡住宅设计".to_string(),
            ..Default::default()
        });
        state
    }

    fn good_selection() -> String {
        serde_json::to_string(&json!({
            "selected_roles": [
                {"role_id": "V4_行业研究员_4-1", "dynamic_role_name": "高端住宅研究员"},
                "V5_场景规划师_5-1",
                "2-1",
                "V6_总工程师_6-1"
            ],
            "task_distribution": {
                "V4_行业研究员_4-1": {"objective": "研究高端住宅趋势", "deliverables":
                    [{"id": "4-1", "name": "趋势研究报告"}]},
                "V5_场景规划师_5-1": {"objective": "核心场景", "deliverables":
                    [{"id": "5-1", "name": "场景清单"}]},
                "2-1": {"objective": "概念方案", "deliverables":
                    [{"id": "2-1", "name": "设计概念"}]},
                "V6_总工程师_6-1": {"tasks": ["施工可行性评估"], "expected_output": "可行性意见",
                    "focus_areas": ["结构", "机电"]}
            },
            "reasoning": "住宅项目标准配置"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_selection_plans_batches_and_advances() {
        let agent = agent_with(MockChatModel::scripted(vec![good_selection()]));
        let outcome = agent.run(&state(), None).await.unwrap();
        match outcome {
            NodeOutcome::Advance { delta, goto } => {
                assert_eq!(goto, WorkflowStage::RoleTaskUnifiedReview);
                assert!(delta.batch_strategy_approved);
                let analysis = delta.strategic_analysis.unwrap();
                assert!(!analysis.fallback_used);
                assert_eq!(analysis.selected_roles.len(), 4);
                // Short id and legacy task format both normalized.
                assert!(analysis.task_distribution.contains_key("V2_设计总监_2-1"));
                let v6 = &analysis.task_distribution["V6_总工程师_6-1"];
                assert_eq!(v6.objective, "可行性意见");
                assert_eq!(v6.deliverables.len(), 1);
                // V4 first, V6 last.
                let batches = delta.execution_batches.unwrap();
                assert_eq!(batches[0], vec!["V4_行业研究员_4-1".to_string()]);
                assert_eq!(
                    batches.last().unwrap(),
                    &vec!["V6_总工程师_6-1".to_string()]
                );
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_v4_retried_then_accepted() {
        let without_v4 = serde_json::to_string(&json!({
            "selected_roles": ["2-1", "V3_叙事策划_3-1", "V5_场景规划师_5-1"],
            "task_distribution": {
                "2-1": {"objective": "概念", "deliverables":
                    [{"id": "2-1", "name": "设计概念"}]},
                "V3_叙事策划_3-1": {"objective": "叙事", "deliverables":
                    [{"id": "3-1", "name": "叙事框架"}]},
                "V5_场景规划师_5-1": {"objective": "场景", "deliverables":
                    [{"id": "5-1", "name": "场景清单"}]}
            },
            "reasoning": ""
        }))
        .unwrap();
        let agent = agent_with(MockChatModel::scripted(vec![without_v4, good_selection()]));
        let outcome = agent.run(&state(), None).await.unwrap();
        match outcome {
            NodeOutcome::Advance { delta, .. } => {
                let analysis = delta.strategic_analysis.unwrap();
                assert!(!analysis.fallback_used);
                assert!(analysis
                    .selected_roles
                    .iter()
                    .any(|r| r.base_type == BaseType::V4));
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_all_attempts_failing_uses_fallback_team() {
        let agent = agent_with(MockChatModel::scripted(vec![
            "不是 JSON".to_string(),
            "也不是 JSON".to_string(),
            "还不是 JSON".to_string(),
        ]));
        let outcome = agent.run(&state(), None).await.unwrap();
        match outcome {
            NodeOutcome::Advance { delta, goto } => {
                assert_eq!(goto, WorkflowStage::RoleTaskUnifiedReview);
                let analysis = delta.strategic_analysis.unwrap();
                assert!(analysis.fallback_used);
                assert!(analysis
                    .selected_roles
                    .iter()
                    .any(|r| r.base_type == BaseType::V4));
                assert!(analysis
                    .selected_roles
                    .iter()
                    .all(|r| r.task_instruction.is_some()));
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    fn analysis_with_counts(counts: &[usize]) -> StrategicAnalysis {
        let catalog = RoleCatalog::builtin();
        let ids = ["V4_行业研究员_4-1", "V4_用户研究员_4-2", "V5_场景规划师_5-1"];
        let mut selected = Vec::new();
        let mut task_distribution = BTreeMap::new();
        for (id, count) in ids.iter().zip(counts) {
            let mut role = catalog.by_id(id).unwrap().clone();
            let task = TaskInstruction {
                deliverables: (0..*count)
                    .map(|i| DeliverableSpec::new(format!("{}-{i}", role.slot()), "x"))
                    .collect(),
                ..Default::default()
            };
            role.task_instruction = Some(task.clone());
            task_distribution.insert(role.role_id.clone(), task);
            selected.push(role);
        }
        StrategicAnalysis {
            selected_roles: selected,
            task_distribution,
            ..Default::default()
        }
    }

    #[test]
    fn test_quality_warning_on_uniform_deliverable_counts() {
        // stddev 0: every role carries the same volume.
        let notes = quality_warnings(&analysis_with_counts(&[2, 2, 2]), &[]);
        assert!(notes.iter().any(|n| n.contains("缺乏差异化")));
    }

    #[test]
    fn test_differentiated_deliverable_counts_pass_quietly() {
        // stddev ~1.7, comfortably above the 0.8 floor.
        let notes = quality_warnings(&analysis_with_counts(&[1, 3, 5]), &[]);
        assert!(!notes.iter().any(|n| n.contains("缺乏差异化")));
    }

    #[tokio::test]
    async fn test_undersized_selection_retried_then_accepted() {
        let two_roles = serde_json::to_string(&json!({
            "selected_roles": ["V4_行业研究员_4-1", "2-1"],
            "task_distribution": {
                "V4_行业研究员_4-1": {"objective": "趋势", "deliverables":
                    [{"id": "4-1", "name": "趋势研究报告"}]},
                "2-1": {"objective": "概念", "deliverables":
                    [{"id": "2-1", "name": "设计概念"}]}
            },
            "reasoning": ""
        }))
        .unwrap();
        let agent = agent_with(MockChatModel::scripted(vec![two_roles, good_selection()]));
        let outcome = agent.run(&state(), None).await.unwrap();
        match outcome {
            NodeOutcome::Advance { delta, .. } => {
                let analysis = delta.strategic_analysis.unwrap();
                assert!(!analysis.fallback_used);
                assert!(analysis.selected_roles.len() >= 3);
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }
}
