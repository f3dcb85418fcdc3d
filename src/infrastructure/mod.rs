//! Infrastructure: configuration, logging, and degradation records.

pub mod config;
pub mod fallback;
pub mod logging;

pub use config::EngineConfig;
pub use fallback::{FallbackEvent, FallbackRecorder};
