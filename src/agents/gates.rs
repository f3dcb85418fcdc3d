//! User-gated approval nodes: requirements confirmation, the role/task
//! unified review, and the post-completion Q&A loop.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agents::{AgentNode, NodeOutcome};
use crate::catalog::prompts::PromptCatalog;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::interrupt::{
    InteractionType, Intent, InterruptPayload, ResumeValue,
};
use crate::domain::models::role::TaskInstruction;
use crate::domain::models::session::{
    AnalysisStage, InteractionEntry, SessionState, StateDelta, WorkflowStage,
};
use crate::domain::ports::{ChatModel, ChatRequest};
use crate::services::capability::CapabilityBoundaryService;
use crate::services::intent::IntentParser;
use crate::services::retry::RetryPolicy;

/// A user edit is significant when the changed span exceeds this many
/// normalized (whitespace-stripped) characters.
const SIGNIFICANT_EDIT_CHARS: usize = 10;

/// Changed-span length between two normalized strings: everything outside
/// the common prefix and suffix.
fn changed_span(original: &str, modified: &str) -> usize {
    let a: Vec<char> = original.chars().filter(|c| !c.is_whitespace()).collect();
    let b: Vec<char> = modified.chars().filter(|c| !c.is_whitespace()).collect();

    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    (a.len() - prefix - suffix).max(b.len() - prefix - suffix)
}

// ---------------------------------------------------------------------------
// Requirements confirmation
// ---------------------------------------------------------------------------

pub struct RequirementsConfirmationGate {
    intent: IntentParser,
}

impl RequirementsConfirmationGate {
    pub fn new(intent: IntentParser) -> Self {
        Self { intent }
    }

    fn suspend_payload(state: &SessionState) -> EngineResult<InterruptPayload> {
        let brief = state
            .structured_requirements
            .as_ref()
            .ok_or(EngineError::MissingState("structured_requirements"))?;
        Ok(InterruptPayload::new(
            InteractionType::RequirementsConfirmation,
            "请确认结构化简报，或提出修改意见",
        )
        .with_body(json!({
            "requirements_summary": brief.summary(),
            "structured_requirements": brief,
            "confirmed_core_tasks": state.confirmed_core_tasks,
        }))
        .with_option("approve", "确认无误")
        .with_option("modify", "修改后重新分析")
        .with_option("reject", "推倒重来"))
    }
}

#[async_trait]
impl AgentNode for RequirementsConfirmationGate {
    fn id(&self) -> WorkflowStage {
        WorkflowStage::RequirementsConfirmation
    }

    async fn run(
        &self,
        state: &SessionState,
        resume: Option<&ResumeValue>,
    ) -> EngineResult<NodeOutcome> {
        if state.requirements_confirmed {
            return Ok(NodeOutcome::advance(
                StateDelta::default(),
                WorkflowStage::CalibrationQuestionnaire,
            ));
        }

        let Some(resume) = resume else {
            return Ok(NodeOutcome::suspend(
                StateDelta::default().with_log(InteractionEntry::now(
                    "system",
                    "suspend",
                    "等待用户确认结构化简报",
                )),
                Self::suspend_payload(state)?,
            ));
        };

        let parsed = self.intent.parse(resume).await;
        let mut delta = StateDelta::default().with_log(InteractionEntry::now(
            "user",
            "resume",
            format!("requirements_confirmation: {}", parsed.intent),
        ));

        // Inline field modifications ride along with any intent; a
        // significant edit triggers full re-analysis.
        let mut amendment_parts: Vec<String> = Vec::new();
        if let Some(cmd) = &parsed.command {
            if let Some(mods) = &cmd.modifications {
                let brief = state.structured_requirements.clone().unwrap_or_default();
                let original = serde_json::to_value(&brief)?;
                for (field, value) in mods {
                    let new_text = value.as_str().map_or_else(|| value.to_string(), String::from);
                    let old_text = original
                        .get(field)
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    if changed_span(old_text, &new_text) > SIGNIFICANT_EDIT_CHARS {
                        amendment_parts.push(format!("{field}: {new_text}"));
                    }
                }
            }
            if let Some(info) = &cmd.additional_info {
                if !info.trim().is_empty() {
                    amendment_parts.push(info.trim().to_string());
                }
            }
            if let Some(feedback) = &cmd.feedback {
                if parsed.intent != Intent::Approve && !feedback.trim().is_empty() {
                    amendment_parts.push(feedback.trim().to_string());
                }
            }
        } else if let Some(content) = &parsed.content {
            if parsed.intent != Intent::Approve {
                amendment_parts.push(content.clone());
            }
        }

        if !amendment_parts.is_empty() {
            delta.has_user_modifications = true;
            delta.user_input_append =
                Some(format!("【用户修改补充】{}", amendment_parts.join("；")));
            return Ok(NodeOutcome::advance(delta, WorkflowStage::RequirementsAnalyst));
        }

        match parsed.intent {
            Intent::Reject | Intent::Revise => {
                delta.user_input_append = Some("【用户修改补充】用户要求重新分析需求".to_string());
                Ok(NodeOutcome::advance(delta, WorkflowStage::RequirementsAnalyst))
            }
            _ => {
                delta.requirements_confirmed = true;
                Ok(NodeOutcome::advance(
                    delta,
                    WorkflowStage::CalibrationQuestionnaire,
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Role & task unified review
// ---------------------------------------------------------------------------

pub struct RoleTaskUnifiedReviewGate {
    intent: IntentParser,
}

impl RoleTaskUnifiedReviewGate {
    pub fn new(intent: IntentParser) -> Self {
        Self { intent }
    }

    fn suspend_payload(state: &SessionState) -> EngineResult<InterruptPayload> {
        let analysis = state
            .strategic_analysis
            .as_ref()
            .ok_or(EngineError::MissingState("strategic_analysis"))?;
        Ok(InterruptPayload::new(
            InteractionType::RoleAndTaskUnifiedReview,
            "请确认专家团队与任务分配，可调整每位专家的工具开关",
        )
        .with_body(json!({
            "role_selection": analysis.selected_roles,
            "task_assignment": analysis.task_distribution,
            "reasoning": analysis.reasoning,
            "execution_batches": state.execution_batches,
            "tool_settings": state.tool_settings,
        }))
        .with_option("approve", "确认团队与任务")
        .with_option("modify", "调整任务分配")
        .with_option("reject", "重新选择团队"))
    }
}

#[async_trait]
impl AgentNode for RoleTaskUnifiedReviewGate {
    fn id(&self) -> WorkflowStage {
        WorkflowStage::RoleTaskUnifiedReview
    }

    async fn run(
        &self,
        state: &SessionState,
        resume: Option<&ResumeValue>,
    ) -> EngineResult<NodeOutcome> {
        if state.role_selection_approved && state.task_assignment_approved {
            return Ok(NodeOutcome::advance(
                StateDelta::default(),
                WorkflowStage::QualityPreflight,
            ));
        }

        let Some(resume) = resume else {
            return Ok(NodeOutcome::suspend(
                StateDelta::default().with_log(InteractionEntry::now(
                    "system",
                    "suspend",
                    "等待用户确认角色与任务分配",
                )),
                Self::suspend_payload(state)?,
            ));
        };

        let parsed = self.intent.parse(resume).await;
        let mut delta = StateDelta::default().with_log(InteractionEntry::now(
            "user",
            "resume",
            format!("role_task_unified_review: {}", parsed.intent),
        ));

        if matches!(parsed.intent, Intent::Reject | Intent::Revise) {
            if let Some(feedback) = parsed
                .command
                .as_ref()
                .and_then(|c| c.feedback.clone())
                .or(parsed.content)
            {
                delta.user_input_append = Some(format!("【团队调整意见】{feedback}"));
            }
            return Ok(NodeOutcome::advance(delta, WorkflowStage::ProjectDirector));
        }

        if let Some(cmd) = &parsed.command {
            if let Some(tool_settings) = &cmd.tool_settings {
                delta.tool_settings = tool_settings.clone();
            }
            if let Some(mods) = &cmd.modifications {
                if let Some(tasks_value) = mods.get("task_distribution") {
                    let modified: BTreeMap<String, TaskInstruction> =
                        serde_json::from_value(tasks_value.clone())?;
                    let original = state
                        .strategic_analysis
                        .clone()
                        .ok_or(EngineError::MissingState("strategic_analysis"))?;
                    let mut amended = original.clone();
                    amended.task_distribution.extend(modified);

                    let boundary_flags =
                        CapabilityBoundaryService::diff_modifications(&original, &amended);
                    for flag in &boundary_flags {
                        warn!(flag, "user task modification crosses capability boundary");
                        delta.interaction_history.push(InteractionEntry::now(
                            "system",
                            "note",
                            flag.clone(),
                        ));
                    }
                    CapabilityBoundaryService::annotate(&mut amended);
                    delta.strategic_analysis = Some(amended);
                }
            }
        }

        delta.role_selection_approved = true;
        delta.task_assignment_approved = true;
        Ok(NodeOutcome::advance(delta, WorkflowStage::QualityPreflight))
    }
}

// ---------------------------------------------------------------------------
// Post-completion Q&A
// ---------------------------------------------------------------------------

pub struct UserQuestionNode {
    model: Arc<dyn ChatModel>,
    prompts: Arc<PromptCatalog>,
    intent: IntentParser,
    retry: RetryPolicy,
}

impl UserQuestionNode {
    pub fn new(
        model: Arc<dyn ChatModel>,
        prompts: Arc<PromptCatalog>,
        intent: IntentParser,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            model,
            prompts,
            intent,
            retry,
        }
    }
}

#[async_trait]
impl AgentNode for UserQuestionNode {
    fn id(&self) -> WorkflowStage {
        WorkflowStage::UserQuestion
    }

    async fn run(
        &self,
        state: &SessionState,
        resume: Option<&ResumeValue>,
    ) -> EngineResult<NodeOutcome> {
        let report = state
            .final_report
            .as_ref()
            .ok_or(EngineError::MissingState("final_report"))?;

        let Some(resume) = resume else {
            return Ok(NodeOutcome::suspend(
                StateDelta::default(),
                InterruptPayload::new(
                    InteractionType::UserQuestion,
                    "分析报告已生成。可继续就报告内容提问，或回复 approve 结束会话",
                )
                .with_option("approve", "结束会话")
                .with_option("ask", "继续提问"),
            ));
        };

        let parsed = self.intent.parse(resume).await;
        if matches!(parsed.intent, Intent::Approve | Intent::Skip) && parsed.content.is_none() {
            let mut delta = StateDelta::stamp(WorkflowStage::UserQuestion);
            delta.analysis_stage = Some(AnalysisStage::Completed);
            return Ok(NodeOutcome::Finish { delta });
        }

        let question = parsed
            .content
            .or_else(|| match resume {
                ResumeValue::Text(t) => Some(t.clone()),
                _ => None,
            })
            .unwrap_or_default();

        let config = self.prompts.get("user_question")?;
        let request = ChatRequest::new(
            config.effective_prompt().unwrap_or_default(),
            format!(
                "最终报告：{}\n\n用户追问：{question}",
                serde_json::to_string(report)?
            ),
        );
        let answer = match self
            .retry
            .execute(|| self.model.complete(request.clone()))
            .await
        {
            Ok(response) => response.content,
            Err(e) => {
                warn!(error = %e, "follow-up answer unavailable");
                "暂时无法回答该问题，请稍后重试或结束会话。".to_string()
            }
        };

        info!(session = %state.session_id, "follow-up question answered");
        let mut delta = StateDelta::default()
            .with_log(InteractionEntry::now("user", "resume", question))
            .with_log(InteractionEntry::now("agent:user_question", "note", answer.clone()));
        delta.is_followup = true;

        Ok(NodeOutcome::suspend(
            delta,
            InterruptPayload::new(InteractionType::UserQuestion, answer)
                .with_option("approve", "结束会话")
                .with_option("ask", "继续提问"),
        ))
    }
}
