//! Feasibility analyst: deterministic conflict detection against the
//! industry-standards table, a priority matrix over the confirmed
//! objectives, and adjustment recommendations.
//!
//! This stage never fails the pipeline. Without a knowledge base it emits an
//! empty assessment and a logged warning.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::agents::{AgentNode, NodeOutcome};
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::feasibility::{
    ConflictDomain, ConflictSeverity, FeasibilityAssessment, FeasibilityLevel, PriorityEntry,
    Recommendation,
};
use crate::domain::models::interrupt::ResumeValue;
use crate::domain::models::session::{
    AnalysisStage, InteractionEntry, SessionState, StateDelta, WorkflowStage,
};
use crate::services::conflict::ConflictService;

pub struct FeasibilityAnalystAgent {
    conflicts: ConflictService,
}

impl FeasibilityAnalystAgent {
    pub fn new(conflicts: ConflictService) -> Self {
        Self { conflicts }
    }

    fn assess(&self, state: &SessionState) -> EngineResult<FeasibilityAssessment> {
        let brief = state
            .structured_requirements
            .as_ref()
            .ok_or(EngineError::MissingState("structured_requirements"))?;

        if !self.conflicts.has_knowledge_base() {
            warn!(
                session = %state.session_id,
                "industry-standards table missing, feasibility assessment empty"
            );
            return Ok(FeasibilityAssessment::empty());
        }

        // Calibration answers refine the corpus: a user who wrote "预算可以
        // 再加" in the questionnaire changes the budget picture.
        let mut corpus = state.user_input.clone();
        if let Some(summary) = &state.questionnaire_summary {
            corpus.push('\n');
            corpus.push_str(&summary.summary_text);
        }

        let detection = self.conflicts.detect(brief, &corpus);

        let mut requirements: Vec<String> = brief.core_objectives.clone();
        for task in &state.confirmed_core_tasks {
            if !requirements.contains(task) {
                requirements.push(task.clone());
            }
        }
        let count = requirements.len().max(1);
        let priority_matrix: Vec<PriorityEntry> = requirements
            .into_iter()
            .enumerate()
            .map(|(i, requirement)| PriorityEntry {
                requirement,
                priority_score: 1.0 - i as f64 / count as f64,
                estimated_cost: String::new(),
            })
            .collect();

        let mut recommendations = Vec::new();
        for domain in ConflictDomain::all() {
            let conflicts = detection.domain(*domain);
            if conflicts.is_empty() {
                continue;
            }
            let worst_is_critical = conflicts
                .iter()
                .any(|c| c.severity == ConflictSeverity::Critical);
            let (name, strategy, adjustments) = match domain {
                ConflictDomain::Budget => (
                    "预算再分配",
                    "按优先级矩阵集中投入核心诉求，次要项降级或后置",
                    vec![
                        "硬装保底、软装分期".to_string(),
                        "高价值空间优先，次要空间选用成本友好的材料".to_string(),
                    ],
                ),
                ConflictDomain::Timeline => (
                    "工期重排",
                    "并行推进设计与长周期采购，压缩关键路径",
                    vec![
                        "提前锁定长交期主材".to_string(),
                        "分阶段交付，先保入住条件".to_string(),
                    ],
                ),
                ConflictDomain::Space => (
                    "功能复合",
                    "以复合功能与弹性家具化解面积缺口",
                    vec![
                        "书房与客房合并".to_string(),
                        "采用可变家具提高空间利用率".to_string(),
                    ],
                ),
            };
            recommendations.push(Recommendation {
                name: name.to_string(),
                strategy: strategy.to_string(),
                adjustments,
                recommended: worst_is_critical,
            });
        }

        let conflict_count = detection.iter().count();
        let overall_feasibility = if detection.has_critical() {
            FeasibilityLevel::Low
        } else if conflict_count > 0 {
            FeasibilityLevel::Medium
        } else {
            FeasibilityLevel::High
        };

        let critical_issues: Vec<String> = detection
            .iter()
            .filter(|(_, c)| c.severity == ConflictSeverity::Critical)
            .map(|(_, c)| c.description.clone())
            .collect();

        Ok(FeasibilityAssessment {
            overall_feasibility,
            critical_issues,
            conflict_detection: detection,
            priority_matrix,
            recommendations,
        })
    }
}

#[async_trait]
impl AgentNode for FeasibilityAnalystAgent {
    fn id(&self) -> WorkflowStage {
        WorkflowStage::FeasibilityAnalyst
    }

    async fn run(
        &self,
        state: &SessionState,
        _resume: Option<&ResumeValue>,
    ) -> EngineResult<NodeOutcome> {
        let assessment = self.assess(state)?;
        info!(
            session = %state.session_id,
            feasibility = ?assessment.overall_feasibility,
            conflicts = assessment.conflict_detection.iter().count(),
            "feasibility assessment complete"
        );

        let mut delta = StateDelta::stamp(WorkflowStage::FeasibilityAnalyst).with_log(
            InteractionEntry::now(
                "agent:feasibility_analyst",
                "note",
                format!("可行性评估：{:?}", assessment.overall_feasibility),
            ),
        );
        delta.analysis_stage = Some(AnalysisStage::Feasibility);
        delta.feasibility_assessment = Some(assessment);
        Ok(NodeOutcome::advance(delta, WorkflowStage::ProjectDirector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::standards::StandardsCatalog;
    use crate::domain::models::requirements::StructuredRequirements;

    fn state_for(raw: &str, objectives: Vec<&str>) -> SessionState {
        let mut state = SessionState::new(raw);
        state.structured_requirements = Some(StructuredRequirements {
            project_task: "住宅设计".to_string(),
            core_objectives: objectives.into_iter().map(str::to_string).collect(),
            ..Default::default()
        });
        state
    }

    fn agent() -> FeasibilityAnalystAgent {
        FeasibilityAnalystAgent::new(ConflictService::new(Some(StandardsCatalog::builtin())))
    }

    #[tokio::test]
    async fn test_critical_budget_yields_low_feasibility() {
        let state = state_for("深圳200㎡住宅，预算40万", vec!["高品质完成面", "充足收纳"]);
        let outcome = agent().run(&state, None).await.unwrap();
        match outcome {
            NodeOutcome::Advance { delta, goto } => {
                assert_eq!(goto, WorkflowStage::ProjectDirector);
                let assessment = delta.feasibility_assessment.unwrap();
                assert_eq!(assessment.overall_feasibility, FeasibilityLevel::Low);
                assert!(!assessment.critical_issues.is_empty());
                assert!(assessment
                    .recommendations
                    .iter()
                    .any(|r| r.name == "预算再分配" && r.recommended));
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_clean_brief_is_high_feasibility() {
        let state = state_for("深圳200㎡住宅，预算300万", vec!["现代极简"]);
        let outcome = agent().run(&state, None).await.unwrap();
        match outcome {
            NodeOutcome::Advance { delta, .. } => {
                let assessment = delta.feasibility_assessment.unwrap();
                assert_eq!(assessment.overall_feasibility, FeasibilityLevel::High);
                assert!(assessment.recommendations.is_empty());
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_priority_matrix_is_descending() {
        let state = state_for(
            "深圳200㎡住宅，预算300万",
            vec!["目标一", "目标二", "目标三"],
        );
        let outcome = agent().run(&state, None).await.unwrap();
        match outcome {
            NodeOutcome::Advance { delta, .. } => {
                let matrix = delta.feasibility_assessment.unwrap().priority_matrix;
                assert_eq!(matrix.len(), 3);
                assert!(matrix
                    .windows(2)
                    .all(|w| w[0].priority_score > w[1].priority_score));
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_knowledge_base_never_fails() {
        let agent = FeasibilityAnalystAgent::new(ConflictService::new(None));
        let state = state_for("预算40万，200㎡", vec![]);
        let outcome = agent.run(&state, None).await.unwrap();
        match outcome {
            NodeOutcome::Advance { delta, goto } => {
                assert_eq!(goto, WorkflowStage::ProjectDirector);
                let assessment = delta.feasibility_assessment.unwrap();
                assert_eq!(assessment.conflict_detection.iter().count(), 0);
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }
}
