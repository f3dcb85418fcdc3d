//! Checkpoint store port.
//!
//! Snapshots are opaque to the store; any backend providing durability and
//! per-key write ordering satisfies the contract (read-committed per
//! session key suffices).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::EngineResult;
use crate::domain::models::interrupt::InterruptPayload;
use crate::domain::models::session::{SessionState, WorkflowStage};

/// Durable snapshot of a session: the full state plus suspension
/// bookkeeping. The pending node is the node that called `interrupt` and
/// will receive the resume value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub state: SessionState,
    pub pending_node: Option<WorkflowStage>,
    pub pending_interrupt: Option<InterruptPayload>,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn running(state: SessionState) -> Self {
        Self {
            state,
            pending_node: None,
            pending_interrupt: None,
            saved_at: Utc::now(),
        }
    }

    pub fn suspended(
        state: SessionState,
        node: WorkflowStage,
        interrupt: InterruptPayload,
    ) -> Self {
        Self {
            state,
            pending_node: Some(node),
            pending_interrupt: Some(interrupt),
            saved_at: Utc::now(),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.pending_node.is_some()
    }
}

/// Port trait for checkpoint persistence.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist the snapshot for a session, replacing any previous one.
    async fn save(&self, session_id: Uuid, snapshot: &Checkpoint) -> EngineResult<()>;

    /// Load the latest snapshot, `None` when the session is unknown.
    async fn load(&self, session_id: Uuid) -> EngineResult<Option<Checkpoint>>;
}
