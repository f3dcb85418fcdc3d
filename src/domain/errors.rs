//! Domain errors for the Atelier orchestration engine.

use thiserror::Error;
use uuid::Uuid;

/// Format a dependency cycle as a human-readable path: `A -> B -> A`.
fn format_cycle_path(path: &[String]) -> String {
    path.join(" -> ")
}

/// Engine-level errors.
///
/// The taxonomy follows the propagation policy: validation and transient
/// failures are recovered close to the agent that produced them, so only
/// contract violations, user cancellations, and internal logic errors are
/// expected to surface through this type at the session boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Session {0} is not suspended; nothing to resume")]
    NotSuspended(Uuid),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Catalog contract violation: {0}")]
    ContractViolation(String),

    #[error("cycle detected: {}", format_cycle_path(.0))]
    CycleDetected(Vec<String>),

    #[error("Missing required state field: {0}")]
    MissingState(&'static str),

    #[error("Chat model error: {0}")]
    Chat(#[from] crate::domain::ports::ChatError),

    #[error("Checkpoint store error: {0}")]
    Checkpoint(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Session cancelled by user: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::ContractViolation(err.to_string())
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Checkpoint(err.to_string())
    }
}

impl EngineError {
    /// True for errors that terminate the session on purpose rather than
    /// signalling a fault. Callers translate these to a user-visible
    /// cancellation instead of a 500-equivalent.
    pub fn is_terminal_cancellation(&self) -> bool {
        matches!(self, EngineError::Cancelled(_))
    }
}
