//! Quality preflight: per-role risk assessment run in parallel before any
//! expert executes. High risk suspends for a user decision; the generated
//! quality checklist is injected into each expert's prompt downstream.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agents::{AgentNode, NodeOutcome};
use crate::catalog::prompts::PromptCatalog;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::expert::{PreflightReport, RiskAssessment, RiskLevel};
use crate::domain::models::interrupt::{InteractionType, InterruptPayload, ResumeValue};
use crate::domain::models::role::Role;
use crate::domain::models::session::{
    AnalysisStage, InteractionEntry, SessionState, StateDelta, WorkflowStage,
};
use crate::domain::ports::{ChatModel, ChatRequest};
use crate::services::output::extract_json;
use crate::services::retry::RetryPolicy;

pub struct QualityPreflightAgent {
    model: Arc<dyn ChatModel>,
    prompts: Arc<PromptCatalog>,
    retry: RetryPolicy,
}

/// Wire shape of one preflight response; `role_id` and `risk_level` are
/// derived, not trusted from the model.
#[derive(Debug, Deserialize, Default)]
struct PreflightWire {
    #[serde(default)]
    risk_assessment: RiskAssessment,
    #[serde(default)]
    risk_points: Vec<String>,
    #[serde(default)]
    quality_checklist: Vec<String>,
    #[serde(default)]
    capability_gaps: Vec<String>,
    #[serde(default)]
    mitigation_suggestions: Vec<String>,
}

impl QualityPreflightAgent {
    pub fn new(model: Arc<dyn ChatModel>, prompts: Arc<PromptCatalog>, retry: RetryPolicy) -> Self {
        Self {
            model,
            prompts,
            retry,
        }
    }

    /// One role's preflight. Parse failures degrade to the default
    /// medium-risk report rather than failing the stage.
    async fn preflight_role(&self, state: &SessionState, role: &Role) -> PreflightReport {
        let wire = self.ask(state, role).await;
        match wire {
            Ok(wire) => PreflightReport {
                role_id: role.role_id.clone(),
                risk_level: RiskLevel::from_score(wire.risk_assessment.overall_risk_score),
                risk_assessment: wire.risk_assessment,
                risk_points: wire.risk_points,
                quality_checklist: wire.quality_checklist,
                capability_gaps: wire.capability_gaps,
                mitigation_suggestions: wire.mitigation_suggestions,
            },
            Err(e) => {
                warn!(role_id = %role.role_id, error = %e, "preflight degraded to default");
                PreflightReport::default_medium(&role.role_id)
            }
        }
    }

    async fn ask(&self, state: &SessionState, role: &Role) -> EngineResult<PreflightWire> {
        let config = self.prompts.get("quality_preflight")?;
        let user = format!(
            "角色：{}\n\n任务：{}\n\n项目需求摘要：{}",
            serde_json::to_string(&json!({
                "role_id": role.role_id,
                "role_name": role.role_name,
                "description": role.description,
            }))?,
            serde_json::to_string_pretty(&role.task_instruction)?,
            state
                .structured_requirements
                .as_ref()
                .map(|b| b.summary())
                .unwrap_or_default(),
        );
        let request = ChatRequest::new(config.effective_prompt().unwrap_or_default(), user);
        let response = self
            .retry
            .execute(|| self.model.complete(request.clone()))
            .await?;
        let value = extract_json(&response.content).ok_or_else(|| {
            EngineError::ValidationFailed("preflight response is not JSON".to_string())
        })?;
        Ok(serde_json::from_value(value)?)
    }

    fn completed_delta() -> StateDelta {
        let mut delta = StateDelta::stamp(WorkflowStage::QualityPreflight);
        delta.analysis_stage = Some(AnalysisStage::Preflight);
        delta.quality_preflight_completed = true;
        delta
    }
}

#[async_trait]
impl AgentNode for QualityPreflightAgent {
    fn id(&self) -> WorkflowStage {
        WorkflowStage::QualityPreflight
    }

    async fn run(
        &self,
        state: &SessionState,
        resume: Option<&ResumeValue>,
    ) -> EngineResult<NodeOutcome> {
        if state.quality_preflight_completed {
            return Ok(NodeOutcome::advance(
                StateDelta::default(),
                WorkflowStage::BatchExecutor,
            ));
        }

        if let Some(resume) = resume {
            // Decision on the high-risk warning.
            let token = match resume {
                ResumeValue::Text(t) => t.trim().to_lowercase(),
                ResumeValue::Command(cmd) => {
                    cmd.intent_text().unwrap_or_default().trim().to_lowercase()
                }
                ResumeValue::Answers(_) => "continue".to_string(),
            };
            if token.contains("cancel") || token.contains("取消") {
                return Err(EngineError::Cancelled(
                    "用户在质量预检警告处终止了分析".to_string(),
                ));
            }
            if token.contains("adjust") || token.contains("调整") {
                let mut delta = StateDelta::default().with_log(InteractionEntry::now(
                    "user",
                    "resume",
                    "预检风险过高，要求调整任务分配",
                ));
                let feedback = match resume {
                    ResumeValue::Command(cmd) => cmd.feedback.clone(),
                    _ => None,
                };
                delta.user_input_append = Some(format!(
                    "【预检调整意见】{}",
                    feedback.unwrap_or_else(|| "降低高风险角色的任务复杂度".to_string())
                ));
                return Ok(NodeOutcome::advance(delta, WorkflowStage::ProjectDirector));
            }
            return Ok(NodeOutcome::advance(
                Self::completed_delta()
                    .with_log(InteractionEntry::now("user", "resume", "接受预检风险，继续执行")),
                WorkflowStage::BatchExecutor,
            ));
        }

        let analysis = state
            .strategic_analysis
            .as_ref()
            .ok_or(EngineError::MissingState("strategic_analysis"))?;

        let reports: Vec<PreflightReport> = join_all(
            analysis
                .selected_roles
                .iter()
                .map(|role| self.preflight_role(state, role)),
        )
        .await;

        let mut by_role: BTreeMap<String, PreflightReport> = BTreeMap::new();
        let mut high_risk: Vec<&PreflightReport> = Vec::new();
        for report in &reports {
            if report.risk_level == RiskLevel::High {
                high_risk.push(report);
            }
        }

        if !high_risk.is_empty() {
            let body = json!({
                "high_risk_roles": high_risk
                    .iter()
                    .map(|r| json!({
                        "role_id": r.role_id,
                        "risk_score": r.risk_assessment.overall_risk_score,
                        "risk_points": r.risk_points,
                        "mitigation_suggestions": r.mitigation_suggestions,
                    }))
                    .collect::<Vec<_>>(),
            });
            let message = format!(
                "质量预检发现 {} 个高风险角色，是否继续执行？",
                high_risk.len()
            );
            for report in reports {
                by_role.insert(report.role_id.clone(), report);
            }
            let mut delta = StateDelta::default().with_log(InteractionEntry::now(
                "system",
                "suspend",
                message.clone(),
            ));
            delta.preflight_reports = by_role;
            return Ok(NodeOutcome::suspend(
                delta,
                InterruptPayload::new(InteractionType::QualityPreflightWarning, message)
                    .with_body(body)
                    .with_option("continue", "接受风险，继续执行")
                    .with_option("adjust", "调整任务分配")
                    .with_option("cancel", "终止本次分析"),
            ));
        }

        info!(
            session = %state.session_id,
            roles = reports.len(),
            "quality preflight clean"
        );
        for report in reports {
            by_role.insert(report.role_id.clone(), report);
        }
        let mut delta = Self::completed_delta();
        delta.preflight_reports = by_role;
        Ok(NodeOutcome::advance(delta, WorkflowStage::BatchExecutor))
    }
}
