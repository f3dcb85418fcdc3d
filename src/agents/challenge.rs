//! Challenge detection: the fan-in point after each expert batch.
//!
//! Scans the just-completed batch's outputs for challenge flags, closes
//! every flag through the router (accept / synthesize / escalate), records
//! the batch, and routes: intermediate batches continue executing, and only
//! after the final batch do escalations or high-impact insights redirect the
//! flow.

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::agents::{AgentNode, NodeOutcome};
use crate::domain::errors::EngineResult;
use crate::domain::models::interrupt::ResumeValue;
use crate::domain::models::session::{
    AnalysisStage, BatchRecord, InteractionEntry, SessionState, StateDelta, WorkflowStage,
};
use crate::services::challenge_router::ChallengeRouter;

pub struct ChallengeDetectionNode;

impl ChallengeDetectionNode {
    /// Post-batch routing. Intermediate batches always continue; after the
    /// final batch, escalations win over the feedback loop, which fires at
    /// most once.
    fn route(state: &SessionState, delta: &StateDelta, final_batch: bool) -> WorkflowStage {
        if !final_batch {
            return WorkflowStage::BatchExecutor;
        }
        let requires_client_review = state.requires_client_review || delta.requires_client_review;
        let requires_feedback_loop = state.requires_feedback_loop || delta.requires_feedback_loop;
        if requires_client_review {
            return WorkflowStage::ReviewCoordinator;
        }
        if requires_feedback_loop && !state.feedback_loop_processed {
            return WorkflowStage::RequirementsAnalyst;
        }
        WorkflowStage::ReviewCoordinator
    }
}

#[async_trait]
impl AgentNode for ChallengeDetectionNode {
    fn id(&self) -> WorkflowStage {
        WorkflowStage::ChallengeDetection
    }

    async fn run(
        &self,
        state: &SessionState,
        _resume: Option<&ResumeValue>,
    ) -> EngineResult<NodeOutcome> {
        // Reached without a dispatched batch: nothing to detect.
        if state.batches_complete() {
            let delta = StateDelta::default();
            let goto = Self::route(state, &delta, true);
            return Ok(NodeOutcome::advance(delta, goto));
        }

        let batch_number = state.current_batch;
        let roles = state.batch_roles(batch_number).to_vec();
        let outputs: Vec<_> = roles
            .iter()
            .filter_map(|id| state.agent_results.get(id))
            .collect();
        let flags: Vec<_> = outputs
            .iter()
            .flat_map(|o| o.challenge_flags.iter().cloned())
            .collect();

        let closure = ChallengeRouter::close(flags);
        info!(
            session = %state.session_id,
            batch = batch_number,
            detected = closure.total_detected,
            escalated = closure.escalations.len(),
            "batch challenges closed"
        );

        let mut delta = StateDelta::default().with_log(InteractionEntry::now(
            "agent:challenge_detection",
            "note",
            format!(
                "第 {batch_number} 批完成：{}/{} 位专家产出，检测到 {} 项挑战",
                outputs.len(),
                roles.len(),
                closure.total_detected
            ),
        ));
        delta.analysis_stage = Some(AnalysisStage::ChallengeResolution);
        delta.challenges_detected = closure.total_detected as usize;
        delta.synthesis_required = closure.has_syntheses();
        delta.has_competing_frameworks = closure.has_syntheses();
        delta.requires_client_review = closure.has_escalations();
        delta.requires_feedback_loop = closure.high_impact_accepted;
        delta.expert_driven_insights = closure.insights;
        delta.insight_updates = closure.insight_updates;
        delta.framework_synthesis = closure.syntheses;
        delta.escalated_challenges = closure.escalations;

        delta.batch_results.push(BatchRecord {
            batch_number,
            succeeded: outputs.len(),
            failed: roles.len() - outputs.len(),
            role_ids: roles,
            completed_at: Utc::now(),
        });
        delta.current_batch = Some(batch_number + 1);
        delta.completed_batches = Some(state.completed_batches + 1);

        let final_batch = batch_number >= state.total_batches;
        let goto = Self::route(state, &delta, final_batch);
        Ok(NodeOutcome::advance(delta, goto))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::challenge::ChallengeFlag;
    use crate::domain::models::expert::ExpertOutput;

    fn output_with_flags(role_id: &str, flags: Vec<ChallengeFlag>) -> ExpertOutput {
        ExpertOutput {
            role_id: role_id.to_string(),
            dynamic_role_name: String::new(),
            raw: String::new(),
            parsed: serde_json::Value::Null,
            handoff: None,
            rationale: "分析完成".to_string(),
            challenge_flags: flags,
            protocol_violations: vec![],
            references: vec![],
            rerun_round: 0,
            completed_at: Utc::now(),
        }
    }

    fn flag(role: &str, item: &str, rationale: &str, impact: &str) -> ChallengeFlag {
        ChallengeFlag {
            expert_role: role.to_string(),
            challenged_item: item.to_string(),
            rationale: rationale.to_string(),
            reinterpretation: format!("对「{item}」的再解释"),
            design_impact: impact.to_string(),
        }
    }

    fn state_with_batches(batches: Vec<Vec<&str>>, current: usize) -> SessionState {
        let mut state = SessionState::new("brief");
        state.total_batches = batches.len();
        state.current_batch = current;
        state.execution_batches = batches
            .into_iter()
            .map(|b| b.into_iter().map(str::to_string).collect())
            .collect();
        state
    }

    #[tokio::test]
    async fn test_intermediate_batch_continues_executing() {
        let mut state = state_with_batches(vec![vec!["V4_研究员_4-1"], vec!["V2_总监_2-1"]], 1);
        state.agent_results.insert(
            "V4_研究员_4-1".to_string(),
            output_with_flags(
                "V4_研究员_4-1",
                vec![flag("V4_研究员_4-1", "收纳需求", "低估", "局部")],
            ),
        );

        let outcome = ChallengeDetectionNode.run(&state, None).await.unwrap();
        match outcome {
            NodeOutcome::Advance { delta, goto } => {
                assert_eq!(goto, WorkflowStage::BatchExecutor);
                assert_eq!(delta.current_batch, Some(2));
                assert_eq!(delta.challenges_detected, 1);
                assert_eq!(delta.expert_driven_insights.len(), 1);
                assert_eq!(delta.batch_results[0].succeeded, 1);
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_final_batch_routes_to_review() {
        let mut state = state_with_batches(vec![vec!["V4_研究员_4-1"]], 1);
        state
            .agent_results
            .insert("V4_研究员_4-1".to_string(), output_with_flags("V4_研究员_4-1", vec![]));

        let outcome = ChallengeDetectionNode.run(&state, None).await.unwrap();
        assert!(matches!(
            outcome,
            NodeOutcome::Advance {
                goto: WorkflowStage::ReviewCoordinator,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_high_impact_insight_triggers_feedback_loop() {
        let mut state = state_with_batches(vec![vec!["V4_研究员_4-1"]], 1);
        state.agent_results.insert(
            "V4_研究员_4-1".to_string(),
            output_with_flags(
                "V4_研究员_4-1",
                vec![flag("V4_研究员_4-1", "收纳需求", "低估", "对布局有根本影响")],
            ),
        );

        let outcome = ChallengeDetectionNode.run(&state, None).await.unwrap();
        match outcome {
            NodeOutcome::Advance { delta, goto } => {
                assert_eq!(goto, WorkflowStage::RequirementsAnalyst);
                assert!(delta.requires_feedback_loop);
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_feedback_loop_fires_at_most_once() {
        let mut state = state_with_batches(vec![vec!["V4_研究员_4-1"]], 1);
        state.feedback_loop_processed = true;
        state.agent_results.insert(
            "V4_研究员_4-1".to_string(),
            output_with_flags(
                "V4_研究员_4-1",
                vec![flag("V4_研究员_4-1", "收纳需求", "低估", "根本影响")],
            ),
        );

        let outcome = ChallengeDetectionNode.run(&state, None).await.unwrap();
        assert!(matches!(
            outcome,
            NodeOutcome::Advance {
                goto: WorkflowStage::ReviewCoordinator,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_escalation_wins_over_feedback_loop() {
        let mut state = state_with_batches(vec![vec!["V4_研究员_4-1", "V6_总工_6-1"]], 1);
        state.agent_results.insert(
            "V4_研究员_4-1".to_string(),
            output_with_flags(
                "V4_研究员_4-1",
                vec![flag("V4_研究员_4-1", "收纳需求", "低估", "根本影响")],
            ),
        );
        state.agent_results.insert(
            "V6_总工_6-1".to_string(),
            output_with_flags(
                "V6_总工_6-1",
                vec![flag("V6_总工_6-1", "承重墙改动", "这是商业决策，超出我的评估范围", "")],
            ),
        );

        let outcome = ChallengeDetectionNode.run(&state, None).await.unwrap();
        match outcome {
            NodeOutcome::Advance { delta, goto } => {
                assert_eq!(goto, WorkflowStage::ReviewCoordinator);
                assert!(delta.requires_client_review);
                assert_eq!(delta.escalated_challenges.len(), 1);
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }
}
