//! Agent nodes of the stage graph.
//!
//! Each node consumes the current session state (plus the resume value when
//! re-entered after a suspension) and returns a `NodeOutcome`: a state delta
//! paired with routing. Fan-out to the experts of a batch is expressed as a
//! `Send` bundle the orchestrator executes in parallel.

use async_trait::async_trait;

use crate::domain::errors::EngineResult;
use crate::domain::models::interrupt::{InterruptPayload, ResumeValue};
use crate::domain::models::review::ReviewFeedback;
use crate::domain::models::session::{SessionState, StateDelta, WorkflowStage};

pub mod aggregator;
pub mod challenge;
pub mod director;
pub mod expert;
pub mod feasibility;
pub mod gates;
pub mod preflight;
pub mod questionnaire;
pub mod requirements;
pub mod review;

/// One parallel sub-invocation requested by a fan-out node.
#[derive(Debug, Clone)]
pub struct ExpertSend {
    pub role_id: String,
    /// Structured review feedback when this is a targeted rerun.
    pub feedback: Option<ReviewFeedback>,
}

/// What a node wants the orchestrator to do next.
#[derive(Debug)]
pub enum NodeOutcome {
    /// Apply the delta and continue at `goto`.
    Advance {
        delta: StateDelta,
        goto: WorkflowStage,
    },
    /// Apply the delta, checkpoint, and hand the interrupt to the caller.
    Suspend {
        delta: StateDelta,
        interrupt: InterruptPayload,
    },
    /// Apply the delta, run the sends in parallel against a state snapshot,
    /// merge their deltas, then continue at `join`.
    FanOut {
        delta: StateDelta,
        sends: Vec<ExpertSend>,
        join: WorkflowStage,
    },
    /// Apply the delta and finish the session.
    Finish { delta: StateDelta },
}

impl NodeOutcome {
    pub fn advance(delta: StateDelta, goto: WorkflowStage) -> Self {
        NodeOutcome::Advance { delta, goto }
    }

    pub fn suspend(delta: StateDelta, interrupt: InterruptPayload) -> Self {
        NodeOutcome::Suspend { delta, interrupt }
    }
}

/// A node of the stage graph.
#[async_trait]
pub trait AgentNode: Send + Sync {
    fn id(&self) -> WorkflowStage;

    /// Execute the node. `resume` carries the user's response when the node
    /// suspended on the previous invocation.
    async fn run(
        &self,
        state: &SessionState,
        resume: Option<&ResumeValue>,
    ) -> EngineResult<NodeOutcome>;
}
