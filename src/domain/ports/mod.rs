//! Ports: abstractions over external collaborators.

pub mod chat_model;
pub mod checkpoint;
pub mod search_tool;

pub use chat_model::{ChatError, ChatModel, ChatRequest, ChatResponse};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use search_tool::{SearchHit, SearchTool, ToolCallRecord, ToolCallStatus, ToolError};
