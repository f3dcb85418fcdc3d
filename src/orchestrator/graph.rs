//! Stage graph: the node registry and the standard wiring.

use std::collections::HashMap;
use std::sync::Arc;

use crate::agents::aggregator::ResultAggregatorAgent;
use crate::agents::challenge::ChallengeDetectionNode;
use crate::agents::director::ProjectDirectorAgent;
use crate::agents::expert::BatchExecutorNode;
use crate::agents::feasibility::FeasibilityAnalystAgent;
use crate::agents::gates::{RequirementsConfirmationGate, RoleTaskUnifiedReviewGate, UserQuestionNode};
use crate::agents::preflight::QualityPreflightAgent;
use crate::agents::questionnaire::CalibrationQuestionnaireAgent;
use crate::agents::requirements::RequirementsAnalyst;
use crate::agents::review::ReviewCoordinatorAgent;
use crate::agents::AgentNode;
use crate::catalog::constraints::ConstraintCatalog;
use crate::catalog::prompts::PromptCatalog;
use crate::catalog::roles::RoleCatalog;
use crate::catalog::standards::StandardsCatalog;
use crate::catalog::weights::WeightsConfig;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::session::WorkflowStage;
use crate::domain::ports::ChatModel;
use crate::infrastructure::fallback::FallbackRecorder;
use crate::services::conflict::ConflictService;
use crate::services::intent::IntentParser;
use crate::services::retry::RetryPolicy;
use crate::services::role_weights::RoleWeightCalculator;

/// Immutable registry of agent nodes keyed by stage.
pub struct StageGraph {
    nodes: HashMap<WorkflowStage, Arc<dyn AgentNode>>,
}

impl StageGraph {
    pub fn builder() -> StageGraphBuilder {
        StageGraphBuilder {
            nodes: HashMap::new(),
        }
    }

    pub fn resolve(&self, stage: WorkflowStage) -> EngineResult<&Arc<dyn AgentNode>> {
        self.nodes
            .get(&stage)
            .ok_or_else(|| EngineError::Internal(format!("no node registered for stage {stage}")))
    }

    pub fn contains(&self, stage: WorkflowStage) -> bool {
        self.nodes.contains_key(&stage)
    }
}

pub struct StageGraphBuilder {
    nodes: HashMap<WorkflowStage, Arc<dyn AgentNode>>,
}

impl StageGraphBuilder {
    /// Register a node under its own stage id. Re-registering a stage
    /// replaces the previous node.
    pub fn node(mut self, node: Arc<dyn AgentNode>) -> Self {
        self.nodes.insert(node.id(), node);
        self
    }

    pub fn build(self) -> StageGraph {
        StageGraph { nodes: self.nodes }
    }
}

/// Everything the standard graph wiring needs.
pub struct GraphDependencies {
    pub model: Arc<dyn ChatModel>,
    pub prompts: Arc<PromptCatalog>,
    pub roles: Arc<RoleCatalog>,
    pub constraints: Arc<ConstraintCatalog>,
    pub weights: WeightsConfig,
    pub standards: Option<StandardsCatalog>,
    pub fallback: Arc<FallbackRecorder>,
    pub retry: RetryPolicy,
}

/// Wire the full production graph.
pub fn standard_graph(deps: GraphDependencies) -> StageGraph {
    let GraphDependencies {
        model,
        prompts,
        roles,
        constraints,
        weights,
        standards,
        fallback,
        retry,
    } = deps;

    StageGraph::builder()
        .node(Arc::new(RequirementsAnalyst::new(
            model.clone(),
            prompts.clone(),
            retry.clone(),
        )))
        .node(Arc::new(RequirementsConfirmationGate::new(
            IntentParser::with_model(model.clone()),
        )))
        .node(Arc::new(CalibrationQuestionnaireAgent::new(
            model.clone(),
            prompts.clone(),
            ConflictService::new(standards.clone()),
            IntentParser::with_model(model.clone()),
            retry.clone(),
        )))
        .node(Arc::new(FeasibilityAnalystAgent::new(ConflictService::new(
            standards,
        ))))
        .node(Arc::new(ProjectDirectorAgent::new(
            model.clone(),
            prompts.clone(),
            roles,
            constraints,
            RoleWeightCalculator::new(weights),
            fallback,
            retry.clone(),
        )))
        .node(Arc::new(RoleTaskUnifiedReviewGate::new(
            IntentParser::with_model(model.clone()),
        )))
        .node(Arc::new(QualityPreflightAgent::new(
            model.clone(),
            prompts.clone(),
            retry.clone(),
        )))
        .node(Arc::new(BatchExecutorNode))
        .node(Arc::new(ChallengeDetectionNode))
        .node(Arc::new(ReviewCoordinatorAgent::new(
            model.clone(),
            prompts.clone(),
            retry.clone(),
        )))
        .node(Arc::new(ResultAggregatorAgent::new(
            model.clone(),
            prompts.clone(),
            retry.clone(),
        )))
        .node(Arc::new(UserQuestionNode::new(
            model.clone(),
            prompts,
            IntentParser::with_model(model),
            retry,
        )))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::llm::mock::MockChatModel;

    #[test]
    fn test_standard_graph_covers_every_interactive_stage() {
        let graph = standard_graph(GraphDependencies {
            model: Arc::new(MockChatModel::scripted(vec![])),
            prompts: Arc::new(PromptCatalog::builtin()),
            roles: Arc::new(RoleCatalog::builtin()),
            constraints: Arc::new(ConstraintCatalog::builtin()),
            weights: WeightsConfig::builtin(),
            standards: Some(StandardsCatalog::builtin()),
            fallback: Arc::new(FallbackRecorder::disabled()),
            retry: RetryPolicy::new(1, 1, 2),
        });

        for stage in [
            WorkflowStage::RequirementsAnalyst,
            WorkflowStage::RequirementsConfirmation,
            WorkflowStage::CalibrationQuestionnaire,
            WorkflowStage::FeasibilityAnalyst,
            WorkflowStage::ProjectDirector,
            WorkflowStage::RoleTaskUnifiedReview,
            WorkflowStage::QualityPreflight,
            WorkflowStage::BatchExecutor,
            WorkflowStage::ChallengeDetection,
            WorkflowStage::ReviewCoordinator,
            WorkflowStage::ResultAggregator,
            WorkflowStage::UserQuestion,
        ] {
            assert!(graph.contains(stage), "missing node for {stage}");
        }
        assert!(!graph.contains(WorkflowStage::Start));
        assert!(!graph.contains(WorkflowStage::End));
    }

    #[test]
    fn test_resolve_unregistered_stage_is_an_error() {
        let graph = StageGraph::builder().build();
        assert!(graph.resolve(WorkflowStage::BatchExecutor).is_err());
    }
}
