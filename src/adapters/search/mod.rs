//! Search tool adapters and the tool-call recorder.

pub mod mock;
pub mod recorder;

pub use mock::MockSearchTool;
pub use recorder::ToolCallRecorder;
