//! Result aggregation: folds every expert deliverable, insight, synthesis
//! and review ruling into the final structured report.
//!
//! Aggregation never fails the session: when the model response does not
//! validate, the report is assembled from the raw expert outputs and marked
//! `partial`.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agents::{AgentNode, NodeOutcome};
use crate::catalog::prompts::PromptCatalog;
use crate::domain::errors::EngineResult;
use crate::domain::models::interrupt::ResumeValue;
use crate::domain::models::report::{ChallengeResolutions, FinalReport};
use crate::domain::models::session::{
    AnalysisStage, InteractionEntry, SessionState, StateDelta, WorkflowStage,
};
use crate::domain::ports::{ChatModel, ChatRequest};
use crate::services::output::extract_json;
use crate::services::retry::RetryPolicy;

const DEFAULT_CONFIDENCE: f64 = 0.7;
const PARTIAL_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Deserialize)]
struct AggregatorWire {
    #[serde(default)]
    executive_summary: String,
    #[serde(default)]
    role_deliverables: BTreeMap<String, String>,
    #[serde(default)]
    final_ruling: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

pub struct ResultAggregatorAgent {
    model: Arc<dyn ChatModel>,
    prompts: Arc<PromptCatalog>,
    retry: RetryPolicy,
}

impl ResultAggregatorAgent {
    pub fn new(model: Arc<dyn ChatModel>, prompts: Arc<PromptCatalog>, retry: RetryPolicy) -> Self {
        Self {
            model,
            prompts,
            retry,
        }
    }

    fn assemble_prompt(&self, state: &SessionState) -> EngineResult<ChatRequest> {
        let config = self.prompts.get("result_aggregator")?;

        let outputs: Vec<_> = state
            .agent_results
            .values()
            .map(|o| {
                json!({
                    "role_id": o.role_id,
                    "dynamic_role_name": o.dynamic_role_name,
                    "rationale": o.rationale,
                    "handoff": o.handoff,
                    "rerun_round": o.rerun_round,
                })
            })
            .collect();

        let mut user = String::new();
        user.push_str("## 项目需求\n");
        if let Some(brief) = &state.structured_requirements {
            user.push_str(&serde_json::to_string_pretty(brief).unwrap_or_default());
        } else {
            user.push_str(&state.user_input);
        }
        user.push_str("\n\n## 专家产出\n");
        user.push_str(&serde_json::to_string_pretty(&outputs).unwrap_or_default());

        if !state.expert_driven_insights.is_empty() {
            user.push_str("\n\n## 专家洞察（已采纳的再解释）\n");
            user.push_str(
                &serde_json::to_string_pretty(&state.expert_driven_insights).unwrap_or_default(),
            );
        }
        if !state.framework_synthesis.is_empty() {
            user.push_str("\n\n## 竞争性框架综合\n");
            user.push_str(
                &serde_json::to_string_pretty(&state.framework_synthesis).unwrap_or_default(),
            );
        }
        if !state.escalated_challenges.is_empty() {
            user.push_str("\n\n## 升级挑战与用户裁决\n");
            user.push_str(
                &serde_json::to_string_pretty(&state.escalated_challenges).unwrap_or_default(),
            );
        }
        if let Some(review) = &state.review_result {
            user.push_str("\n\n## 评审结论\n");
            user.push_str(&serde_json::to_string_pretty(review).unwrap_or_default());
        }
        user.push_str(
            "\n\n请输出 JSON，包含 executive_summary、role_deliverables（按角色 ID 键入）、\
             final_ruling、confidence（0 到 1）。",
        );

        Ok(ChatRequest::new(
            config.effective_prompt().unwrap_or_default(),
            user,
        ))
    }

    /// Closure accounting over the whole session. An escalation only counts
    /// as closed once the user has ruled on it.
    fn challenge_resolutions(state: &SessionState) -> ChallengeResolutions {
        let accepted: Vec<String> = state.expert_driven_insights.keys().cloned().collect();
        let synthesized: Vec<String> = state.framework_synthesis.keys().cloned().collect();
        let escalated: Vec<String> = state
            .escalated_challenges
            .iter()
            .map(|e| e.flag.challenged_item.clone())
            .collect();

        let ruled = state
            .escalated_challenges
            .iter()
            .filter(|e| e.ruling.is_some())
            .count();
        let detected = state.total_challenges_detected;
        let closure_rate = if detected == 0 {
            1.0
        } else {
            ((accepted.len() + synthesized.len() + ruled) as f64 / detected as f64).min(1.0)
        };

        ChallengeResolutions {
            accepted,
            synthesized,
            escalated,
            closure_rate,
        }
    }

    /// Assemble a report straight from the raw outputs when the model
    /// response does not validate.
    fn partial_report(state: &SessionState) -> FinalReport {
        let role_deliverables: BTreeMap<String, String> = state
            .agent_results
            .iter()
            .map(|(id, o)| {
                let body = if o.rationale.is_empty() {
                    o.raw.clone()
                } else {
                    o.rationale.clone()
                };
                (id.clone(), body)
            })
            .collect();
        FinalReport {
            executive_summary: "报告聚合未完成，以下为各专家的原始结论。".to_string(),
            role_deliverables,
            final_ruling: String::new(),
            partial: true,
            ..FinalReport::default()
        }
    }

    async fn aggregate(&self, state: &SessionState) -> EngineResult<FinalReport> {
        let request = self.assemble_prompt(state)?;
        let wire = match self.retry.execute(|| self.model.complete(request.clone())).await {
            Ok(response) => extract_json(&response.content)
                .and_then(|v| serde_json::from_value::<AggregatorWire>(v).ok()),
            Err(e) => {
                warn!(session = %state.session_id, error = %e, "aggregation call failed");
                None
            }
        };

        let mut report = match wire {
            Some(wire) if !wire.executive_summary.is_empty() => {
                let mut report = FinalReport {
                    executive_summary: wire.executive_summary,
                    role_deliverables: wire.role_deliverables,
                    final_ruling: wire.final_ruling,
                    partial: false,
                    ..FinalReport::default()
                };
                report.metadata.confidence = wire.confidence.clamp(0.0, 1.0);
                // Experts the model skipped keep their raw conclusions.
                for (id, output) in &state.agent_results {
                    report
                        .role_deliverables
                        .entry(id.clone())
                        .or_insert_with(|| output.rationale.clone());
                }
                report
            }
            _ => {
                warn!(session = %state.session_id, "aggregation response invalid, partial report");
                let mut report = Self::partial_report(state);
                report.metadata.confidence = PARTIAL_CONFIDENCE;
                report
            }
        };

        report.challenge_resolutions = Self::challenge_resolutions(state);
        report.bibliography = state.search_references.clone();
        report.metadata.review_rounds = state.review_round;
        report.metadata.generated_at = Some(Utc::now());
        Ok(report)
    }
}

#[async_trait]
impl AgentNode for ResultAggregatorAgent {
    fn id(&self) -> WorkflowStage {
        WorkflowStage::ResultAggregator
    }

    async fn run(
        &self,
        state: &SessionState,
        _resume: Option<&ResumeValue>,
    ) -> EngineResult<NodeOutcome> {
        let report = self.aggregate(state).await?;
        info!(
            session = %state.session_id,
            partial = report.partial,
            deliverables = report.role_deliverables.len(),
            "final report assembled"
        );

        let mut delta = StateDelta::stamp(WorkflowStage::ResultAggregator).with_log(
            InteractionEntry::now(
                "agent:result_aggregator",
                "note",
                format!(
                    "聚合 {} 份专家产出，挑战闭环率 {:.0}%",
                    report.role_deliverables.len(),
                    report.challenge_resolutions.closure_rate * 100.0
                ),
            ),
        );
        delta.analysis_stage = Some(AnalysisStage::Aggregation);
        delta.final_report = Some(report);
        Ok(NodeOutcome::advance(delta, WorkflowStage::UserQuestion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::llm::mock::MockChatModel;
    use crate::domain::models::challenge::{
        AcceptedInsight, ChallengeClass, ChallengeFlag, EscalatedChallenge,
    };
    use crate::domain::models::expert::ExpertOutput;

    fn output(role_id: &str, rationale: &str) -> ExpertOutput {
        ExpertOutput {
            role_id: role_id.to_string(),
            dynamic_role_name: String::new(),
            raw: format!("{rationale}（原文）"),
            parsed: serde_json::Value::Null,
            handoff: None,
            rationale: rationale.to_string(),
            challenge_flags: vec![],
            protocol_violations: vec![],
            references: vec![],
            rerun_round: 0,
            completed_at: Utc::now(),
        }
    }

    fn state_with_results() -> SessionState {
        let mut state = SessionState::new("改造180㎡的江景住宅");
        state.agent_results.insert(
            "V2_设计总监_2-1".to_string(),
            output("V2_设计总监_2-1", "概念方案：以江景为轴线组织公共区"),
        );
        state.agent_results.insert(
            "V4_行业研究员_4-1".to_string(),
            output("V4_行业研究员_4-1", "高端住宅市场趋势分析"),
        );
        state
    }

    fn agent_with(model: MockChatModel) -> ResultAggregatorAgent {
        ResultAggregatorAgent::new(
            Arc::new(model),
            Arc::new(PromptCatalog::builtin()),
            RetryPolicy::new(1, 1, 2),
        )
    }

    #[tokio::test]
    async fn test_aggregates_report_and_advances() {
        let agent = agent_with(MockChatModel::scripted(vec![json!({
            "executive_summary": "以江景为核心的整体改造方案",
            "role_deliverables": {"V2_设计总监_2-1": "概念深化稿"},
            "final_ruling": "方案成立",
            "confidence": 0.85
        })
        .to_string()]));
        let state = state_with_results();

        let outcome = agent.run(&state, None).await.unwrap();
        match outcome {
            NodeOutcome::Advance { delta, goto } => {
                assert_eq!(goto, WorkflowStage::UserQuestion);
                let report = delta.final_report.unwrap();
                assert!(!report.partial);
                assert_eq!(report.metadata.confidence, 0.85);
                // The skipped expert keeps its own conclusion.
                assert!(report
                    .role_deliverables
                    .contains_key("V4_行业研究员_4-1"));
                assert_eq!(delta.analysis_stage, Some(AnalysisStage::Aggregation));
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_response_yields_partial_report() {
        let agent = agent_with(MockChatModel::scripted(vec![
            "抱歉，我无法输出结构化结果".to_string(),
        ]));
        let state = state_with_results();

        let outcome = agent.run(&state, None).await.unwrap();
        match outcome {
            NodeOutcome::Advance { delta, .. } => {
                let report = delta.final_report.unwrap();
                assert!(report.partial);
                assert_eq!(report.role_deliverables.len(), 2);
                assert_eq!(report.metadata.confidence, PARTIAL_CONFIDENCE);
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_failure_yields_partial_report() {
        let agent = agent_with(MockChatModel::failing());
        let state = state_with_results();

        let outcome = agent.run(&state, None).await.unwrap();
        match outcome {
            NodeOutcome::Advance { delta, .. } => {
                assert!(delta.final_report.unwrap().partial);
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[test]
    fn test_closure_rate_counts_only_ruled_escalations() {
        let mut state = state_with_results();
        state.total_challenges_detected = 3;
        state.expert_driven_insights.insert(
            "收纳需求".to_string(),
            AcceptedInsight {
                accepted_from: "V4_行业研究员_4-1".to_string(),
                expert_reinterpretation: "收纳面积应提高到12%".to_string(),
                design_impact: "局部".to_string(),
                timestamp: Utc::now(),
            },
        );
        state.escalated_challenges.push(EscalatedChallenge {
            flag: ChallengeFlag {
                expert_role: "V6_总工程师_6-1".to_string(),
                challenged_item: "承重墙改动".to_string(),
                rationale: String::new(),
                reinterpretation: String::new(),
                design_impact: String::new(),
            },
            class: ChallengeClass::OutOfScopeForClient,
            ruling: None,
        });

        let res = ResultAggregatorAgent::challenge_resolutions(&state);
        assert_eq!(res.accepted.len(), 1);
        assert_eq!(res.escalated.len(), 1);
        // 1 accepted of 3 detected; the unruled escalation stays open.
        assert!((res.closure_rate - 1.0 / 3.0).abs() < 1e-9);

        state.escalated_challenges[0].ruling = Some("维持原结构".to_string());
        let res = ResultAggregatorAgent::challenge_resolutions(&state);
        assert!((res.closure_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_closure_rate_is_full_without_challenges() {
        let state = state_with_results();
        let res = ResultAggregatorAgent::challenge_resolutions(&state);
        assert_eq!(res.closure_rate, 1.0);
    }
}
