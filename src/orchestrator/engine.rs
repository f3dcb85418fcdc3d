//! Session driver.
//!
//! Runs the stage graph one node at a time: applies the node's delta under
//! the session merge policy, checkpoints after every transition, hands
//! interrupts back to the caller, and executes expert fan-outs in parallel
//! against an immutable state snapshot.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agents::expert::ExpertExecutor;
use crate::agents::{ExpertSend, NodeOutcome};
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::interrupt::{InterruptPayload, ResumeValue};
use crate::domain::models::report::FinalReport;
use crate::domain::models::session::{
    InteractionEntry, SessionState, StateDelta, WorkflowStage,
};
use crate::domain::ports::{Checkpoint, CheckpointStore};
use crate::orchestrator::graph::StageGraph;

/// Hard ceiling on stage transitions per drive; a session that loops this
/// long has a routing bug.
const MAX_TRANSITIONS: usize = 128;

pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// How a drive ended: waiting on the user, or done.
#[derive(Debug)]
pub enum SessionOutcome {
    Suspended(InterruptPayload),
    Completed(Box<FinalReport>),
}

#[derive(Debug)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub outcome: SessionOutcome,
}

/// Caller-controlled toggles applied at session creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    pub skip_questionnaire: bool,
    pub skip_review: bool,
}

pub struct AnalysisEngine {
    graph: StageGraph,
    executor: Arc<ExpertExecutor>,
    checkpoints: Arc<dyn CheckpointStore>,
    fan_out_limit: Arc<Semaphore>,
}

impl AnalysisEngine {
    pub fn new(
        graph: StageGraph,
        executor: Arc<ExpertExecutor>,
        checkpoints: Arc<dyn CheckpointStore>,
        max_parallel: usize,
    ) -> Self {
        Self {
            graph,
            executor,
            checkpoints,
            fan_out_limit: Arc::new(Semaphore::new(max_parallel.max(1))),
        }
    }

    /// Start a new session from raw user input and drive it until it
    /// suspends or completes.
    pub async fn start_session(
        &self,
        user_input: impl Into<String>,
    ) -> EngineResult<SessionHandle> {
        self.start_session_with(user_input, SessionOptions::default())
            .await
    }

    pub async fn start_session_with(
        &self,
        user_input: impl Into<String>,
        options: SessionOptions,
    ) -> EngineResult<SessionHandle> {
        let mut state = SessionState::new(user_input);
        state.skip_questionnaire = options.skip_questionnaire;
        state.skip_review = options.skip_review;
        let session_id = state.session_id;
        info!(session = %session_id, "session started");
        let outcome = self
            .drive(state, WorkflowStage::RequirementsAnalyst, None)
            .await?;
        Ok(SessionHandle {
            session_id,
            outcome,
        })
    }

    /// Resume a suspended session with the user's response. The resume value
    /// is delivered to the node that raised the interrupt.
    pub async fn resume_session(
        &self,
        session_id: Uuid,
        resume: ResumeValue,
    ) -> EngineResult<SessionHandle> {
        let checkpoint = self
            .checkpoints
            .load(session_id)
            .await?
            .ok_or(EngineError::SessionNotFound(session_id))?;
        let Some(pending) = checkpoint.pending_node else {
            return Err(EngineError::NotSuspended(session_id));
        };
        info!(session = %session_id, stage = %pending, "session resumed");
        let outcome = self.drive(checkpoint.state, pending, Some(resume)).await?;
        Ok(SessionHandle {
            session_id,
            outcome,
        })
    }

    /// Latest checkpoint of a session.
    pub async fn session(&self, session_id: Uuid) -> EngineResult<Checkpoint> {
        self.checkpoints
            .load(session_id)
            .await?
            .ok_or(EngineError::SessionNotFound(session_id))
    }

    async fn drive(
        &self,
        mut state: SessionState,
        mut stage: WorkflowStage,
        mut resume: Option<ResumeValue>,
    ) -> EngineResult<SessionOutcome> {
        for _ in 0..MAX_TRANSITIONS {
            let node = self.graph.resolve(stage)?;
            let outcome = match node.run(&state, resume.as_ref()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(session = %state.session_id, stage = %stage, error = %e, "node failed");
                    let mut delta = StateDelta::default();
                    delta.error = Some(e.to_string());
                    state.apply(delta);
                    // Best-effort error checkpoint; the original error wins.
                    if let Err(save_err) = self.save_running(&state).await {
                        warn!(error = %save_err, "error checkpoint not saved");
                    }
                    return Err(e);
                }
            };
            resume = None;

            match outcome {
                NodeOutcome::Advance { delta, goto } => {
                    state.apply(delta);
                    state.current_stage = goto;
                    self.save_running(&state).await?;
                    stage = goto;
                }
                NodeOutcome::Suspend { delta, interrupt } => {
                    state.apply(delta);
                    self.checkpoints
                        .save(
                            state.session_id,
                            &Checkpoint::suspended(state.clone(), stage, interrupt.clone()),
                        )
                        .await?;
                    return Ok(SessionOutcome::Suspended(interrupt));
                }
                NodeOutcome::FanOut { delta, sends, join } => {
                    state.apply(delta);
                    self.save_running(&state).await?;
                    for expert_delta in self.run_sends(&state, sends).await {
                        state.apply(expert_delta);
                    }
                    state.current_stage = join;
                    self.save_running(&state).await?;
                    stage = join;
                }
                NodeOutcome::Finish { delta } => {
                    state.apply(delta);
                    state.current_stage = WorkflowStage::End;
                    self.save_running(&state).await?;
                    let report = state
                        .final_report
                        .clone()
                        .ok_or(EngineError::MissingState("final_report"))?;
                    info!(session = %state.session_id, "session completed");
                    return Ok(SessionOutcome::Completed(Box::new(report)));
                }
            }
        }
        Err(EngineError::Internal(format!(
            "session {} exceeded {MAX_TRANSITIONS} stage transitions",
            state.session_id
        )))
    }

    async fn save_running(&self, state: &SessionState) -> EngineResult<()> {
        self.checkpoints
            .save(state.session_id, &Checkpoint::running(state.clone()))
            .await
    }

    /// Execute the sends of a fan-out in parallel against a snapshot of the
    /// pre-batch state. Deltas merge in role-id order so the merged state
    /// does not depend on completion order; a failed expert degrades the
    /// session instead of aborting the batch.
    async fn run_sends(&self, state: &SessionState, sends: Vec<ExpertSend>) -> Vec<StateDelta> {
        let snapshot = Arc::new(state.clone());
        let mut tasks = JoinSet::new();
        for send in sends {
            let executor = self.executor.clone();
            let snapshot = snapshot.clone();
            let permits = self.fan_out_limit.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let role_id = send.role_id.clone();
                let result = executor.execute(&snapshot, &send).await;
                (role_id, result)
            });
        }

        let mut succeeded: Vec<(String, StateDelta)> = Vec::new();
        let mut failed: Vec<(String, EngineError)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((role_id, Ok(delta))) => succeeded.push((role_id, delta)),
                Ok((role_id, Err(e))) => {
                    warn!(session = %state.session_id, role = %role_id, error = %e, "expert failed");
                    failed.push((role_id, e));
                }
                Err(e) => {
                    error!(session = %state.session_id, error = %e, "expert task aborted");
                }
            }
        }

        succeeded.sort_by(|a, b| a.0.cmp(&b.0));
        let mut deltas: Vec<StateDelta> = succeeded.into_iter().map(|(_, d)| d).collect();
        if !failed.is_empty() {
            let mut degraded = StateDelta::default();
            degraded.degraded = true;
            for (role_id, e) in failed {
                degraded = degraded.with_log(InteractionEntry::now(
                    "system",
                    "error",
                    format!("专家 {role_id} 执行失败：{e}"),
                ));
            }
            deltas.push(degraded);
        }
        deltas
    }
}
