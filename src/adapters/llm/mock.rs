//! Scripted chat model for tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::domain::ports::{ChatError, ChatModel, ChatRequest, ChatResponse};

type Responder = Box<dyn Fn(&ChatRequest) -> Result<String, ChatError> + Send + Sync>;

enum Mode {
    /// Responses popped front-to-back; exhaustion is an invalid-response
    /// error so over-consuming tests fail loudly.
    Scripted(Mutex<VecDeque<String>>),
    Responder(Responder),
    Failing,
}

pub struct MockChatModel {
    mode: Mode,
    calls: Mutex<Vec<ChatRequest>>,
}

impl MockChatModel {
    pub fn scripted(responses: Vec<String>) -> Self {
        Self {
            mode: Mode::Scripted(Mutex::new(responses.into())),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Responds per request via the given closure; useful when the call
    /// order is not deterministic (parallel fan-out).
    pub fn responding<F>(responder: F) -> Self
    where
        F: Fn(&ChatRequest) -> Result<String, ChatError> + Send + Sync + 'static,
    {
        Self {
            mode: Mode::Responder(Box::new(responder)),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails with a transient network error.
    pub fn failing() -> Self {
        Self {
            mode: Mode::Failing,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<ChatRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    fn model_id(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        let content = match &self.mode {
            Mode::Scripted(queue) => queue
                .lock()
                .map_err(|_| ChatError::InvalidResponse("mock poisoned".to_string()))?
                .pop_front()
                .ok_or_else(|| ChatError::InvalidResponse("mock script exhausted".to_string()))?,
            Mode::Responder(responder) => responder(&request)?,
            Mode::Failing => return Err(ChatError::Network("mock outage".to_string())),
        };
        Ok(ChatResponse {
            content,
            input_tokens: 0,
            output_tokens: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_responses_in_order() {
        let model = MockChatModel::scripted(vec!["one".into(), "two".into()]);
        let req = ChatRequest::new("s", "u");
        assert_eq!(model.complete(req.clone()).await.unwrap().content, "one");
        assert_eq!(model.complete(req.clone()).await.unwrap().content, "two");
        assert!(model.complete(req).await.is_err());
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn test_responder_sees_request() {
        let model = MockChatModel::responding(|req| Ok(format!("echo:{}", req.user)));
        let out = model.complete(ChatRequest::new("s", "hello")).await.unwrap();
        assert_eq!(out.content, "echo:hello");
    }
}
