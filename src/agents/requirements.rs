//! Requirements analyst: structures the raw brief into the shared
//! requirements record.
//!
//! Re-invoked in two loops: once when the user amends the brief at the
//! confirmation gate (full re-analysis of the amended input, confirmation
//! gate skipped afterwards), and once when accepted high-impact challenge
//! insights feed back into the brief.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agents::{AgentNode, NodeOutcome};
use crate::catalog::prompts::PromptCatalog;
use crate::domain::errors::EngineResult;
use crate::domain::models::interrupt::ResumeValue;
use crate::domain::models::requirements::StructuredRequirements;
use crate::domain::models::session::{
    AnalysisStage, InteractionEntry, SessionState, StateDelta, WorkflowStage,
};
use crate::domain::ports::{ChatModel, ChatRequest};
use crate::services::output;
use crate::services::retry::RetryPolicy;

pub struct RequirementsAnalyst {
    model: Arc<dyn ChatModel>,
    prompts: Arc<PromptCatalog>,
    retry: RetryPolicy,
}

impl RequirementsAnalyst {
    pub fn new(model: Arc<dyn ChatModel>, prompts: Arc<PromptCatalog>, retry: RetryPolicy) -> Self {
        Self {
            model,
            prompts,
            retry,
        }
    }

    async fn analyze(&self, user_input: &str) -> EngineResult<(StructuredRequirements, bool)> {
        let config = self.prompts.get("requirements_analyst_lite")?;
        let system = config
            .effective_prompt()
            .unwrap_or_default()
            .replace("{user_specific_request}", user_input);

        let request = ChatRequest::new(system, user_input);
        let response = match self
            .retry
            .execute(|| self.model.complete(request.clone()))
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "requirements model unavailable, degrading to heuristic brief");
                return Ok((heuristic_brief(user_input), true));
            }
        };

        if let Some(brief) = output::extract_as::<StructuredRequirements>(&response.content) {
            return Ok((brief, false));
        }

        // One correction retry on a malformed structure.
        let correction = ChatRequest::new(
            request.system.clone(),
            format!(
                "上一次输出不是合法的 JSON 结构化简报，请只输出 JSON 对象。原始需求：{user_input}"
            ),
        );
        match self.model.complete(correction).await {
            Ok(second) => {
                if let Some(brief) = output::extract_as::<StructuredRequirements>(&second.content) {
                    Ok((brief, false))
                } else {
                    warn!("requirements output malformed after correction retry, degrading");
                    Ok((heuristic_brief(user_input), true))
                }
            }
            Err(e) => {
                warn!(error = %e, "correction retry failed, degrading");
                Ok((heuristic_brief(user_input), true))
            }
        }
    }
}

/// Safe default brief built from the raw input when the model is out.
fn heuristic_brief(user_input: &str) -> StructuredRequirements {
    let first_line = user_input.lines().next().unwrap_or(user_input);
    StructuredRequirements {
        project_task: first_line.chars().take(120).collect(),
        project_overview: user_input.chars().take(400).collect(),
        core_objectives: vec!["满足用户描述的核心诉求".to_string()],
        ..Default::default()
    }
}

#[async_trait]
impl AgentNode for RequirementsAnalyst {
    fn id(&self) -> WorkflowStage {
        WorkflowStage::RequirementsAnalyst
    }

    async fn run(
        &self,
        state: &SessionState,
        _resume: Option<&ResumeValue>,
    ) -> EngineResult<NodeOutcome> {
        let modification_pass = state.has_user_modifications && !state.user_modification_processed;
        let feedback_pass = state.requires_feedback_loop && !state.feedback_loop_processed;

        // Idempotent replay: the brief exists, is confirmed, and no loop is
        // pending.
        if state.structured_requirements.is_some()
            && state.requirements_confirmed
            && !modification_pass
            && !feedback_pass
        {
            return Ok(NodeOutcome::advance(
                StateDelta::default(),
                WorkflowStage::CalibrationQuestionnaire,
            ));
        }

        let mut input = state.user_input.clone();
        if feedback_pass {
            let insights: Vec<String> = state
                .expert_driven_insights
                .values()
                .map(|i| format!("{}（来自 {}）", i.expert_reinterpretation, i.accepted_from))
                .collect();
            input.push_str(&format!("\n【专家洞察补充】{}", insights.join("；")));
        }

        let (brief, degraded) = self.analyze(&input).await?;
        info!(
            session = %state.session_id,
            degraded,
            modification_pass,
            feedback_pass,
            "requirements analysis complete"
        );

        let mut delta = StateDelta::stamp(WorkflowStage::RequirementsAnalyst).with_log(
            InteractionEntry::now(
                "agent:requirements_analyst",
                "note",
                format!("结构化简报已生成：{}", brief.summary()),
            ),
        );
        delta.analysis_stage = Some(AnalysisStage::Requirements);
        delta.confirmed_core_tasks = Some(brief.core_objectives.clone());
        delta.structured_requirements = Some(brief);
        delta.degraded = degraded;

        if modification_pass {
            // Re-analysis of an amended brief skips the confirmation gate.
            delta.user_modification_processed = true;
            return Ok(NodeOutcome::advance(
                delta,
                WorkflowStage::CalibrationQuestionnaire,
            ));
        }
        if feedback_pass {
            delta.feedback_loop_processed = true;
            return Ok(NodeOutcome::advance(delta, WorkflowStage::ReviewCoordinator));
        }

        Ok(NodeOutcome::advance(
            delta,
            WorkflowStage::RequirementsConfirmation,
        ))
    }
}
