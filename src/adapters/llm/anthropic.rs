//! Anthropic Messages API adapter for the chat model port.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::domain::ports::{ChatError, ChatModel, ChatRequest, ChatResponse};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "claude-sonnet-4-5".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug)]
pub struct AnthropicChatModel {
    client: reqwest::Client,
    config: AnthropicConfig,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl AnthropicChatModel {
    pub fn new(config: AnthropicConfig) -> Result<Self, ChatError> {
        if config.api_key.is_empty() {
            return Err(ChatError::NotConfigured(
                "ANTHROPIC_API_KEY is not set".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChatError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ChatModel for AnthropicChatModel {
    fn model_id(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        let url = format!("{}/v1/messages", self.config.base_url);
        let body = json!({
            "model": self.config.model,
            "max_tokens": request.max_tokens.unwrap_or(4096),
            "temperature": request.temperature.unwrap_or(0.7),
            "system": request.system,
            "messages": [{ "role": "user", "content": request.user }],
        });

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChatError::Timeout(self.config.timeout_secs)
                } else {
                    ChatError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => ChatError::Auth(message),
                429 => ChatError::RateLimited(message),
                s if s >= 500 || s == 529 => ChatError::Server { status: s, message },
                _ => ChatError::InvalidResponse(format!("HTTP {status}: {message}")),
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ChatError::InvalidResponse(e.to_string()))?;

        let content: String = parsed
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text.as_str())
            .collect();
        if content.is_empty() {
            return Err(ChatError::InvalidResponse(
                "response carried no text blocks".to_string(),
            ));
        }

        debug!(
            model = %self.config.model,
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            "completion received"
        );
        Ok(ChatResponse {
            content,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_is_not_configured() {
        let err = AnthropicChatModel::new(AnthropicConfig::default()).unwrap_err();
        assert!(matches!(err, ChatError::NotConfigured(_)));
    }

    #[test]
    fn test_messages_response_parsing() {
        let raw = r#"{
            "content": [
                {"type": "text", "text": "分析"},
                {"type": "text", "text": "结果"}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        let text: String = parsed.content.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(text, "分析结果");
        assert_eq!(parsed.usage.output_tokens, 5);
    }
}
