//! Review coordinator: red-team critique, blue-team validation, client
//! arbitration, and the targeted-rerun decision.
//!
//! Problem-driven: round 1 reruns only the experts with validated findings;
//! round 2 always approves, so the review loop is bounded. Escalated
//! challenges suspend for user rulings after the decision is made.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agents::{AgentNode, ExpertSend, NodeOutcome};
use crate::catalog::prompts::PromptCatalog;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::expert::ExpertOutput;
use crate::domain::models::interrupt::{InteractionType, InterruptPayload, ResumeValue};
use crate::domain::models::review::{
    BlueStance, BlueTeamReport, ClientReview, FeedbackTask, RedBlueDebate, RedIssue,
    RedTeamReport, ReviewDecision, ReviewFeedback, ReviewResult, REVIEW_SCHEMA_VERSION,
};
use crate::domain::models::session::{
    AnalysisStage, InteractionEntry, SessionState, StateDelta, WorkflowStage,
};
use crate::domain::ports::{ChatModel, ChatRequest};
use crate::services::output::extract_json;
use crate::services::retry::RetryPolicy;

/// Reviews approve no later than this round.
const MAX_REVIEW_ROUNDS: u32 = 2;

const PEER_SUMMARY_CHARS: usize = 300;

pub struct ReviewCoordinatorAgent {
    model: Arc<dyn ChatModel>,
    prompts: Arc<PromptCatalog>,
    retry: RetryPolicy,
}

impl ReviewCoordinatorAgent {
    pub fn new(model: Arc<dyn ChatModel>, prompts: Arc<PromptCatalog>, retry: RetryPolicy) -> Self {
        Self {
            model,
            prompts,
            retry,
        }
    }

    async fn phase(&self, phase: &str, payload: String) -> EngineResult<serde_json::Value> {
        let config = self.prompts.get("review_agents")?;
        let request = ChatRequest::new(
            config.effective_prompt().unwrap_or_default(),
            format!("【评审阶段：{phase}】\n{payload}"),
        );
        let response = self
            .retry
            .execute(|| self.model.complete(request.clone()))
            .await?;
        extract_json(&response.content).ok_or_else(|| {
            EngineError::ValidationFailed(format!("{phase} response is not JSON"))
        })
    }

    async fn red_team(&self, state: &SessionState) -> RedTeamReport {
        let outputs: Vec<_> = state
            .agent_results
            .values()
            .map(|o| {
                json!({
                    "role_id": o.role_id,
                    "dynamic_role_name": o.dynamic_role_name,
                    "summary": o.peer_summary(PEER_SUMMARY_CHARS),
                    "protocol_violations": o.protocol_violations,
                })
            })
            .collect();
        let payload = serde_json::to_string_pretty(&outputs).unwrap_or_default();
        match self.phase("red_team", payload).await {
            Ok(value) => serde_json::from_value(value).unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "red team unavailable, no findings");
                RedTeamReport::default()
            }
        }
    }

    async fn blue_team(&self, red: &RedTeamReport) -> BlueTeamReport {
        let payload = serde_json::to_string_pretty(red).unwrap_or_default();
        match self.phase("blue_team", payload).await {
            Ok(value) => serde_json::from_value(value).unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "blue team unavailable, findings pass unfiltered");
                BlueTeamReport::default()
            }
        }
    }

    async fn client_review(&self, debate: &RedBlueDebate) -> ClientReview {
        let payload = serde_json::to_string_pretty(debate).unwrap_or_default();
        match self.phase("client_review", payload).await {
            Ok(value) => serde_json::from_value(value).unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "client review unavailable");
                ClientReview::default()
            }
        }
    }

    /// Apply user rulings to the pending escalations and move on.
    fn apply_rulings(state: &SessionState, resume: &ResumeValue) -> NodeOutcome {
        let mut rulings: BTreeMap<String, String> = BTreeMap::new();
        match resume {
            ResumeValue::Command(cmd) => {
                if let Some(mods) = &cmd.modifications {
                    for (item, value) in mods {
                        let text = value
                            .as_str()
                            .map_or_else(|| value.to_string(), String::from);
                        rulings.insert(item.clone(), text);
                    }
                }
                if rulings.is_empty() {
                    if let Some(feedback) = cmd.feedback.clone().or(cmd.additional_info.clone()) {
                        for esc in &state.escalated_challenges {
                            if esc.ruling.is_none() {
                                rulings.insert(esc.flag.challenged_item.clone(), feedback.clone());
                            }
                        }
                    }
                }
            }
            ResumeValue::Text(text) => {
                for esc in &state.escalated_challenges {
                    if esc.ruling.is_none() {
                        rulings.insert(esc.flag.challenged_item.clone(), text.clone());
                    }
                }
            }
            ResumeValue::Answers(answers) => {
                for answer in answers {
                    rulings.insert(answer.question_id.clone(), answer.answer.as_text());
                }
            }
        }

        let mut delta = StateDelta::default().with_log(InteractionEntry::now(
            "user",
            "resume",
            format!("用户对 {} 项升级挑战作出裁决", rulings.len()),
        ));
        delta.escalation_rulings = rulings;
        NodeOutcome::advance(delta, WorkflowStage::ResultAggregator)
    }

    fn approve_outcome(state: &SessionState, result: ReviewResult) -> NodeOutcome {
        let pending: Vec<_> = state
            .escalated_challenges
            .iter()
            .filter(|e| e.ruling.is_none())
            .collect();

        let mut delta = StateDelta::stamp(WorkflowStage::ReviewCoordinator);
        delta.analysis_stage = Some(AnalysisStage::Review);
        delta.review_round = Some(result.round);
        delta.review_result = Some(result);

        if pending.is_empty() {
            return NodeOutcome::advance(delta, WorkflowStage::ResultAggregator);
        }

        let body = json!({
            "escalated_challenges": pending
                .iter()
                .map(|e| json!({
                    "challenged_item": e.flag.challenged_item,
                    "expert_role": e.flag.expert_role,
                    "rationale": e.flag.rationale,
                    "class": e.class,
                }))
                .collect::<Vec<_>>(),
        });
        NodeOutcome::suspend(
            delta.with_log(InteractionEntry::now(
                "system",
                "suspend",
                format!("{} 项挑战升级待用户裁决", pending.len()),
            )),
            InterruptPayload::new(
                InteractionType::AnalysisReview,
                "以下专业挑战超出团队决策范围，请逐项裁决",
            )
            .with_body(body)
            .with_option("submit", "提交裁决"),
        )
    }
}

/// Match a red-team `agent_id` to a selected role: exact role id, exact
/// dynamic role name, base-type prefix, then keyword containment.
fn match_agent_id<'a>(
    agent_id: &str,
    outputs: &'a BTreeMap<String, ExpertOutput>,
) -> Option<&'a str> {
    if let Some((id, _)) = outputs.iter().find(|(id, _)| id.as_str() == agent_id) {
        return Some(id);
    }
    if let Some((id, _)) = outputs
        .iter()
        .find(|(_, o)| !o.dynamic_role_name.is_empty() && o.dynamic_role_name == agent_id)
    {
        return Some(id);
    }
    if agent_id.starts_with('V') {
        let prefix: String = agent_id.chars().take(2).collect();
        if let Some((id, _)) = outputs.iter().find(|(id, _)| id.starts_with(&prefix)) {
            return Some(id);
        }
    }
    outputs
        .iter()
        .find(|(id, o)| id.contains(agent_id) || o.dynamic_role_name.contains(agent_id))
        .map(|(id, _)| id.as_str())
}

#[async_trait]
impl AgentNode for ReviewCoordinatorAgent {
    fn id(&self) -> WorkflowStage {
        WorkflowStage::ReviewCoordinator
    }

    async fn run(
        &self,
        state: &SessionState,
        resume: Option<&ResumeValue>,
    ) -> EngineResult<NodeOutcome> {
        if let Some(resume) = resume {
            return Ok(Self::apply_rulings(state, resume));
        }

        let round = state.review_round + 1;

        if state.skip_review {
            info!(session = %state.session_id, "review skipped by configuration");
            return Ok(Self::approve_outcome(
                state,
                ReviewResult::approved(round, "评审已按配置跳过"),
            ));
        }

        // Bounded review: the second round approves without another debate.
        if round >= MAX_REVIEW_ROUNDS {
            info!(session = %state.session_id, round, "review round cap reached, approving");
            return Ok(Self::approve_outcome(
                state,
                ReviewResult::approved(round, "复核通过（达到评审轮次上限）"),
            ));
        }

        let red = self.red_team(state).await;
        if red.improvements.is_empty() {
            return Ok(Self::approve_outcome(
                state,
                ReviewResult::approved(round, "红队未发现需要整改的问题"),
            ));
        }

        let blue = self.blue_team(&red).await;
        let mut debate = RedBlueDebate::default();
        for issue in red.improvements {
            let stance = blue
                .validations
                .iter()
                .find(|v| v.issue_id == issue.issue_id)
                .map(|v| v.stance);
            match stance {
                Some(BlueStance::Disagree) => debate.filtered_issues.push(issue),
                _ => debate.validated_issues.push(issue),
            }
        }

        let client = self.client_review(&debate).await;

        if debate.validated_issues.is_empty() {
            let result = ReviewResult {
                schema_version: REVIEW_SCHEMA_VERSION,
                round,
                red_blue_debate: debate,
                client_review: client,
                final_ruling: "红队发现均被蓝队判定为误报".to_string(),
                improvement_suggestions: Vec::new(),
                decision: ReviewDecision::Approve,
                timestamp: chrono::Utc::now(),
            };
            return Ok(Self::approve_outcome(state, result));
        }

        // Targeted rerun: only experts with validated findings run again.
        let mut feedback_by_role: BTreeMap<String, ReviewFeedback> = BTreeMap::new();
        let mut unmatched: Vec<&RedIssue> = Vec::new();
        for issue in &debate.validated_issues {
            let Some(role_id) = match_agent_id(&issue.agent_id, &state.agent_results) else {
                unmatched.push(issue);
                continue;
            };
            let entry = feedback_by_role
                .entry(role_id.to_string())
                .or_insert_with(|| ReviewFeedback {
                    round,
                    previous_output_summary: state
                        .agent_results
                        .get(role_id)
                        .map(|o| o.peer_summary(PEER_SUMMARY_CHARS))
                        .unwrap_or_default(),
                    what_worked: blue
                        .strengths
                        .iter()
                        .filter(|s| s.agent_id == issue.agent_id)
                        .map(|s| s.description.clone())
                        .collect(),
                    ..Default::default()
                });
            entry.needs_improvement.push(issue.issue.clone());
            entry.specific_tasks.push(FeedbackTask {
                instruction: if issue.expected.is_empty() {
                    issue.issue.clone()
                } else {
                    issue.expected.clone()
                },
                example: String::new(),
                validation: String::new(),
                priority: issue.priority,
            });
        }
        for issue in unmatched {
            warn!(agent_id = %issue.agent_id, "validated finding matched no expert");
        }

        if feedback_by_role.is_empty() {
            let result = ReviewResult {
                schema_version: REVIEW_SCHEMA_VERSION,
                round,
                red_blue_debate: debate,
                client_review: client,
                final_ruling: "发现的问题无法定位到具体专家，予以放行".to_string(),
                improvement_suggestions: Vec::new(),
                decision: ReviewDecision::Approve,
                timestamp: chrono::Utc::now(),
            };
            return Ok(Self::approve_outcome(state, result));
        }

        let agent_ids: Vec<String> = feedback_by_role.keys().cloned().collect();
        info!(
            session = %state.session_id,
            round,
            reruns = agent_ids.len(),
            "targeted rerun ordered"
        );
        let result = ReviewResult {
            schema_version: REVIEW_SCHEMA_VERSION,
            round,
            red_blue_debate: debate,
            client_review: client,
            final_ruling: format!("定向重做 {} 位专家", agent_ids.len()),
            improvement_suggestions: feedback_by_role
                .values()
                .flat_map(|f| f.needs_improvement.iter().cloned())
                .collect(),
            decision: ReviewDecision::RerunSpecific {
                agent_ids: agent_ids.clone(),
            },
            timestamp: chrono::Utc::now(),
        };

        let mut delta = StateDelta::stamp(WorkflowStage::ReviewCoordinator).with_log(
            InteractionEntry::now(
                "agent:review_coordinator",
                "note",
                format!("第 {round} 轮评审：定向重做 {}", agent_ids.join("、")),
            ),
        );
        delta.analysis_stage = Some(AnalysisStage::Review);
        delta.review_round = Some(round);
        delta.review_result = Some(result);

        let sends = feedback_by_role
            .into_iter()
            .map(|(role_id, feedback)| ExpertSend {
                role_id,
                feedback: Some(feedback),
            })
            .collect();
        Ok(NodeOutcome::FanOut {
            delta,
            sends,
            join: WorkflowStage::ReviewCoordinator,
        })
    }
}
