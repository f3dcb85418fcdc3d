//! Adapters behind the domain ports: chat models, checkpoint stores, and
//! search tools.

pub mod checkpoint;
pub mod llm;
pub mod search;
