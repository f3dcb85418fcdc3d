//! Chat model adapters.

pub mod anthropic;
pub mod mock;

pub use anthropic::{AnthropicChatModel, AnthropicConfig};
pub use mock::MockChatModel;
