//! Domain layer: pure business types, errors, and ports.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{EngineError, EngineResult};
