//! Expert execution: the batch fan-out node and the per-role executor.
//!
//! The executor assembles one prompt per role (brief, task instruction, peer
//! context from earlier batches, quality checklist, optional rerun feedback),
//! enforces the output protocol with a single correction retry, and records
//! tool-call references. Protocol fields still missing after the retry are
//! kept as violations instead of failing the run.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agents::{AgentNode, ExpertSend, NodeOutcome};
use crate::adapters::search::ToolCallRecorder;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::challenge::ChallengeFlag;
use crate::domain::models::expert::{
    ExpertHandoffResponse, ExpertOutput, REQUIRED_EXPERT_FIELDS,
};
use crate::domain::models::interrupt::ResumeValue;
use crate::domain::models::role::Role;
use crate::domain::models::session::{
    AnalysisStage, InteractionEntry, SessionState, StateDelta, WorkflowStage,
};
use crate::domain::ports::{ChatModel, ChatRequest, SearchTool};
use crate::services::output::extract_json;
use crate::services::retry::RetryPolicy;

/// Peer-context summaries are trimmed to this many chars per expert.
const PEER_SUMMARY_CHARS: usize = 200;

/// At most this many deliverables trigger a search query per role.
const MAX_SEARCH_QUERIES: usize = 2;

pub struct ExpertExecutor {
    model: Arc<dyn ChatModel>,
    search: Option<Arc<dyn SearchTool>>,
    recorder: Arc<ToolCallRecorder>,
    retry: RetryPolicy,
}

impl ExpertExecutor {
    pub fn new(
        model: Arc<dyn ChatModel>,
        search: Option<Arc<dyn SearchTool>>,
        recorder: Arc<ToolCallRecorder>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            model,
            search,
            recorder,
            retry,
        }
    }

    /// Execute one expert send against a state snapshot, returning the
    /// delta to merge.
    pub async fn execute(
        &self,
        state: &SessionState,
        send: &ExpertSend,
    ) -> EngineResult<StateDelta> {
        let analysis = state
            .strategic_analysis
            .as_ref()
            .ok_or(EngineError::MissingState("strategic_analysis"))?;
        let role = analysis.role(&send.role_id).ok_or_else(|| {
            EngineError::ContractViolation(format!("send for unselected role {}", send.role_id))
        })?;

        let references = self.gather_references(state, role).await;
        let (system, user) = self.assemble_prompt(state, role, send, &references)?;

        let request = ChatRequest::new(system.clone(), user.clone());
        let response = self
            .retry
            .execute(|| self.model.complete(request.clone()))
            .await?;

        let mut raw = response.content;
        let mut parsed = extract_json(&raw);
        let mut missing = missing_fields(parsed.as_ref());

        // One correction retry naming the absent fields.
        if !missing.is_empty() {
            warn!(role_id = %role.role_id, ?missing, "expert output incomplete, retrying once");
            let correction = format!(
                "{user}\n\n【格式修正】上一次输出缺少字段：{}。请重新输出完整 JSON。",
                missing.join("、")
            );
            let retry_request = ChatRequest::new(system, correction);
            if let Ok(second) = self
                .retry
                .execute(|| self.model.complete(retry_request.clone()))
                .await
            {
                let second_parsed = extract_json(&second.content);
                let second_missing = missing_fields(second_parsed.as_ref());
                if second_missing.len() < missing.len() {
                    raw = second.content;
                    parsed = second_parsed;
                    missing = second_missing;
                }
            }
        }

        let parsed = parsed.unwrap_or(serde_json::Value::Null);
        let handoff: Option<ExpertHandoffResponse> = parsed
            .get("expert_handoff_response")
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        let rationale = parsed
            .get("design_rationale")
            .or_else(|| parsed.get("decision_rationale"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let mut challenge_flags: Vec<ChallengeFlag> = parsed
            .get("challenge_flags")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        for flag in &mut challenge_flags {
            if flag.expert_role.is_empty() {
                flag.expert_role = role.role_id.clone();
            }
        }

        if !missing.is_empty() {
            warn!(role_id = %role.role_id, ?missing, "protocol violations recorded");
        }
        let output = ExpertOutput {
            role_id: role.role_id.clone(),
            dynamic_role_name: role.dynamic_role_name.clone(),
            raw,
            parsed,
            handoff,
            rationale,
            challenge_flags,
            protocol_violations: missing,
            references: references.clone(),
            rerun_round: send.feedback.as_ref().map_or(0, |f| f.round),
            completed_at: Utc::now(),
        };
        info!(
            role_id = %role.role_id,
            challenges = output.challenge_flags.len(),
            violations = output.protocol_violations.len(),
            rerun_round = output.rerun_round,
            "expert run complete"
        );

        let mut delta = StateDelta::default().with_log(InteractionEntry::now(
            format!("agent:{}", role.role_id),
            "note",
            format!("专家输出完成（挑战 {} 项）", output.challenge_flags.len()),
        ));
        delta.search_references = references;
        delta.agent_results.insert(role.role_id.clone(), output);
        Ok(delta)
    }

    async fn gather_references(
        &self,
        state: &SessionState,
        role: &Role,
    ) -> Vec<crate::domain::models::report::SearchReference> {
        let Some(tool) = &self.search else {
            return Vec::new();
        };
        if !state.tools_enabled(&role.role_id) {
            return Vec::new();
        }
        let Some(task) = &role.task_instruction else {
            return Vec::new();
        };
        let topic = state
            .structured_requirements
            .as_ref()
            .map(|b| b.project_task.clone())
            .unwrap_or_default();

        let mut references = Vec::new();
        for deliverable in task.deliverables.iter().take(MAX_SEARCH_QUERIES) {
            let query = format!("{topic} {}", deliverable.name);
            let refs = self
                .recorder
                .search(tool.as_ref(), &query, Some(&deliverable.short_id()))
                .await;
            references.extend(refs);
        }
        references
    }

    fn assemble_prompt(
        &self,
        state: &SessionState,
        role: &Role,
        send: &ExpertSend,
        references: &[crate::domain::models::report::SearchReference],
    ) -> EngineResult<(String, String)> {
        let brief = state
            .structured_requirements
            .as_ref()
            .ok_or(EngineError::MissingState("structured_requirements"))?;
        let system = role
            .system_prompt
            .replace("{user_specific_request}", &state.user_input);

        let mut user = format!("结构化简报：{}\n", serde_json::to_string_pretty(brief)?);
        if !state.confirmed_core_tasks.is_empty() {
            user.push_str(&format!(
                "\n已确认核心任务：\n{}\n",
                state.confirmed_core_tasks.join("\n")
            ));
        }
        if let Some(task) = &role.task_instruction {
            user.push_str(&format!(
                "\n任务指令：{}\n",
                serde_json::to_string_pretty(task)?
            ));
        }

        // Earlier batches' outputs as peer context.
        let peers: Vec<String> = state
            .agent_results
            .iter()
            .filter(|(id, _)| *id != &role.role_id)
            .map(|(id, output)| format!("{id}：{}", output.peer_summary(PEER_SUMMARY_CHARS)))
            .collect();
        if !peers.is_empty() {
            user.push_str(&format!("\n协作上下文（已完成的专家结论摘要）：\n{}\n", peers.join("\n")));
        }

        if let Some(report) = state.preflight_reports.get(&role.role_id) {
            if !report.quality_checklist.is_empty() {
                user.push_str(&format!(
                    "\n质量检查清单（输出前逐项自检）：\n{}\n",
                    report.quality_checklist.join("\n")
                ));
            }
        }

        if !references.is_empty() {
            let lines: Vec<String> = references
                .iter()
                .map(|r| format!("- {}：{}", r.title, r.snippet))
                .collect();
            user.push_str(&format!("\n检索参考：\n{}\n", lines.join("\n")));
        }

        if let Some(feedback) = &send.feedback {
            user.push_str(&format!(
                "\n【评审反馈，第 {} 轮重做】{}\n",
                feedback.round,
                serde_json::to_string_pretty(feedback)?
            ));
        }

        user.push_str(&format!(
            "\n输出必须为 JSON 对象，且必须包含字段：{}。无异议时 challenge_flags 输出空数组。",
            REQUIRED_EXPERT_FIELDS.join("、")
        ));
        Ok((system, user))
    }
}

/// Contract fields absent from a parsed expert output.
fn missing_fields(parsed: Option<&serde_json::Value>) -> Vec<String> {
    let Some(value) = parsed else {
        return REQUIRED_EXPERT_FIELDS.iter().map(|f| (*f).to_string()).collect();
    };
    REQUIRED_EXPERT_FIELDS
        .iter()
        .filter(|f| value.get(**f).is_none())
        .map(|f| (*f).to_string())
        .collect()
}

/// Fans the current batch out to the executor; the merge continues at
/// challenge detection.
pub struct BatchExecutorNode;

#[async_trait]
impl AgentNode for BatchExecutorNode {
    fn id(&self) -> WorkflowStage {
        WorkflowStage::BatchExecutor
    }

    async fn run(
        &self,
        state: &SessionState,
        _resume: Option<&ResumeValue>,
    ) -> EngineResult<NodeOutcome> {
        if state.batches_complete() {
            return Ok(NodeOutcome::advance(
                StateDelta::default(),
                WorkflowStage::ChallengeDetection,
            ));
        }

        let roles = state.batch_roles(state.current_batch).to_vec();
        if roles.is_empty() {
            return Err(EngineError::ContractViolation(format!(
                "batch {} is empty",
                state.current_batch
            )));
        }
        info!(
            session = %state.session_id,
            batch = state.current_batch,
            total = state.total_batches,
            roles = roles.len(),
            "dispatching expert batch"
        );

        let mut delta = StateDelta::default().with_log(InteractionEntry::now(
            "system",
            "note",
            format!(
                "执行第 {}/{} 批专家：{}",
                state.current_batch,
                state.total_batches,
                roles.join("、")
            ),
        ));
        delta.analysis_stage = Some(AnalysisStage::ExpertExecution);
        let sends = roles
            .into_iter()
            .map(|role_id| ExpertSend {
                role_id,
                feedback: None,
            })
            .collect();
        Ok(NodeOutcome::FanOut {
            delta,
            sends,
            join: WorkflowStage::ChallengeDetection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::llm::mock::MockChatModel;
    use crate::adapters::search::MockSearchTool;
    use crate::domain::models::requirements::StructuredRequirements;
    use crate::domain::models::role::{DeliverableSpec, TaskInstruction};
    use crate::domain::models::session::StrategicAnalysis;
    use crate::domain::ports::SearchHit;
    use serde_json::json;

    fn good_output() -> String {
        serde_json::to_string(&json!({
            "expert_handoff_response": {
                "critical_questions_responses": {"收纳策略": "整墙收纳 + 独立储物间"},
                "chosen_design_stance": "七分展示三分实用"
            },
            "design_rationale": "以动线效率为先的布局逻辑",
            "challenge_flags": [],
            "analysis": "……"
        }))
        .unwrap()
    }

    fn state_with_role(role_id: &str, tools_on: bool) -> SessionState {
        let catalog = crate::catalog::roles::RoleCatalog::builtin();
        let mut role = catalog.by_id(role_id).unwrap().clone();
        role.task_instruction = Some(TaskInstruction {
            objective: "研究".to_string(),
            deliverables: vec![DeliverableSpec::new("4-1", "趋势研究")],
            ..Default::default()
        });
        let mut state = SessionState::new("深圳200㎡住宅");
        state.structured_requirements = Some(StructuredRequirements {
            project_task: "住宅设计".to_string(),
            ..Default::default()
        });
        state.strategic_analysis = Some(StrategicAnalysis {
            selected_roles: vec![role],
            ..Default::default()
        });
        if tools_on {
            state.tool_settings.insert(role_id.to_string(), true);
        }
        state
    }

    fn executor(model: MockChatModel, search: Option<Arc<dyn SearchTool>>) -> ExpertExecutor {
        ExpertExecutor::new(
            Arc::new(model),
            search,
            Arc::new(ToolCallRecorder::new(None)),
            RetryPolicy::new(1, 1, 2),
        )
    }

    #[tokio::test]
    async fn test_clean_output_parsed_into_agent_results() {
        let exec = executor(MockChatModel::scripted(vec![good_output()]), None);
        let state = state_with_role("V4_行业研究员_4-1", false);
        let send = ExpertSend {
            role_id: "V4_行业研究员_4-1".to_string(),
            feedback: None,
        };

        let delta = exec.execute(&state, &send).await.unwrap();
        let output = &delta.agent_results["V4_行业研究员_4-1"];
        assert!(output.protocol_violations.is_empty());
        assert!(output.handoff.is_some());
        assert_eq!(output.rationale, "以动线效率为先的布局逻辑");
        assert_eq!(output.rerun_round, 0);
    }

    #[tokio::test]
    async fn test_missing_fields_retried_then_recorded() {
        // Both responses lack the handoff block; one correction retry, then
        // the violation is recorded and the run still succeeds.
        let partial = serde_json::to_string(&json!({
            "design_rationale": "只有理由",
            "challenge_flags": []
        }))
        .unwrap();
        let exec = executor(
            MockChatModel::scripted(vec![partial.clone(), partial]),
            None,
        );
        let state = state_with_role("V4_行业研究员_4-1", false);
        let send = ExpertSend {
            role_id: "V4_行业研究员_4-1".to_string(),
            feedback: None,
        };

        let delta = exec.execute(&state, &send).await.unwrap();
        let output = &delta.agent_results["V4_行业研究员_4-1"];
        assert_eq!(
            output.protocol_violations,
            vec!["expert_handoff_response".to_string()]
        );
        assert!(output.handoff.is_none());
    }

    #[tokio::test]
    async fn test_tool_references_attached_when_enabled() {
        let search: Arc<dyn SearchTool> = Arc::new(MockSearchTool::with_hits(vec![SearchHit {
            title: "行业标准".into(),
            url: "https://example.com".into(),
            snippet: "收纳占比 12%".into(),
            relevance_score: 0.9,
        }]));
        let exec = executor(MockChatModel::scripted(vec![good_output()]), Some(search));
        let state = state_with_role("V4_行业研究员_4-1", true);
        let send = ExpertSend {
            role_id: "V4_行业研究员_4-1".to_string(),
            feedback: None,
        };

        let delta = exec.execute(&state, &send).await.unwrap();
        assert_eq!(delta.search_references.len(), 1);
        assert_eq!(
            delta.agent_results["V4_行业研究员_4-1"].references.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_challenge_flags_stamped_with_role() {
        let with_flag = serde_json::to_string(&json!({
            "expert_handoff_response": {},
            "design_rationale": "r",
            "challenge_flags": [{
                "challenged_item": "收纳需求被低估",
                "rationale": "储物量超出假设",
                "reinterpretation": "提高到12%",
                "design_impact": "中等"
            }]
        }))
        .unwrap();
        let exec = executor(MockChatModel::scripted(vec![with_flag]), None);
        let state = state_with_role("V4_行业研究员_4-1", false);
        let send = ExpertSend {
            role_id: "V4_行业研究员_4-1".to_string(),
            feedback: None,
        };

        let delta = exec.execute(&state, &send).await.unwrap();
        let output = &delta.agent_results["V4_行业研究员_4-1"];
        assert_eq!(output.challenge_flags[0].expert_role, "V4_行业研究员_4-1");
    }

    #[tokio::test]
    async fn test_batch_node_fans_out_current_batch() {
        let mut state = state_with_role("V4_行业研究员_4-1", false);
        state.execution_batches = vec![vec!["V4_行业研究员_4-1".to_string()]];
        state.current_batch = 1;
        state.total_batches = 1;

        let outcome = BatchExecutorNode.run(&state, None).await.unwrap();
        match outcome {
            NodeOutcome::FanOut { sends, join, .. } => {
                assert_eq!(sends.len(), 1);
                assert_eq!(sends[0].role_id, "V4_行业研究员_4-1");
                assert_eq!(join, WorkflowStage::ChallengeDetection);
            }
            other => panic!("expected fan-out, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_batch_node_advances_when_complete() {
        let mut state = state_with_role("V4_行业研究员_4-1", false);
        state.execution_batches = vec![vec!["V4_行业研究员_4-1".to_string()]];
        state.current_batch = 2;
        state.total_batches = 1;

        let outcome = BatchExecutorNode.run(&state, None).await.unwrap();
        assert!(matches!(
            outcome,
            NodeOutcome::Advance {
                goto: WorkflowStage::ChallengeDetection,
                ..
            }
        ));
    }
}
