//! Immutable on-disk catalogs validated at boot: prompts, roles,
//! allocation constraints, role weights, and the industry-standards
//! knowledge base.

pub mod constraints;
pub mod prompts;
pub mod roles;
pub mod standards;
pub mod weights;

pub use constraints::{AllocationCheck, AllocationRule, ConstraintCatalog};
pub use prompts::{shared_catalog, PromptCatalog, PromptConfig, CORE_PROMPT_CONFIGS};
pub use roles::RoleCatalog;
pub use standards::StandardsCatalog;
pub use weights::{TagRule, WeightsConfig};
