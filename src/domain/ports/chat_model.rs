//! Chat model port.
//!
//! Abstracts the LLM provider behind a single completion call so agents can
//! run against the HTTP adapter in production and the scripted mock in
//! tests. Implementations must be `Send + Sync` for concurrent use across
//! tokio tasks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single system + user completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: Some(4096),
            temperature: Some(0.7),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Chat model errors. Transient variants are retried with exponential
/// backoff by the caller's retry policy.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Model not configured: {0}")]
    NotConfigured(String),
}

impl ChatError {
    /// Retry on rate limits, network faults, timeouts and 5xx; never on
    /// auth or malformed-response errors.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChatError::RateLimited(_)
                | ChatError::Network(_)
                | ChatError::Timeout(_)
                | ChatError::Server { .. }
        )
    }
}

/// Port trait for chat model implementations.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Provider identifier, e.g. "anthropic", "mock".
    fn model_id(&self) -> &str;

    /// Execute one completion.
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ChatError>;
}
