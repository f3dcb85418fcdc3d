//! Stateless domain services shared by the agent nodes.

pub mod batch_scheduler;
pub mod capability;
pub mod challenge_router;
pub mod conflict;
pub mod intent;
pub mod output;
pub mod retry;
pub mod role_weights;

pub use batch_scheduler::BatchScheduler;
pub use capability::CapabilityBoundaryService;
pub use challenge_router::{ChallengeClosure, ChallengeRouter};
pub use conflict::ConflictService;
pub use intent::IntentParser;
pub use retry::RetryPolicy;
pub use role_weights::RoleWeightCalculator;
