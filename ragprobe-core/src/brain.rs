//! The model completion interface.
//!
//! Every pipeline talks to the model through [`CompletionProvider`]; the
//! OpenAI-compatible HTTP implementation lives in `providers`, and
//! [`MockCompletionProvider`] scripts responses for tests.

use crate::error::LlmError;
use crate::types::{Completion, CompletionRequest};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Trait for model completion providers.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Perform a completion and return every candidate choice.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError>;

    /// Provider name used in logs.
    fn name(&self) -> &str;
}

/// A scripted provider for tests.
///
/// Responses are consumed in FIFO order. Once the script runs out, the
/// fallback response (if any) is returned for every further call; without a
/// fallback the call fails with `LlmError::EmptyCompletion`.
pub struct MockCompletionProvider {
    script: Mutex<VecDeque<Result<Completion, LlmError>>>,
    fallback: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockCompletionProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a provider that always answers with the given text.
    pub fn with_response(text: &str) -> Self {
        Self {
            fallback: Some(text.to_string()),
            ..Self::new()
        }
    }

    /// Queue a single-choice text response.
    pub fn queue_text(&self, text: impl Into<String>) {
        self.queue(Ok(Completion::single("mock-model", text)));
    }

    /// Queue a multi-choice response.
    pub fn queue_choices(&self, choices: Vec<String>) {
        self.queue(Ok(Completion {
            model: "mock-model".to_string(),
            choices,
        }));
    }

    /// Queue a failure.
    pub fn queue_error(&self, error: LlmError) {
        self.queue(Err(error));
    }

    fn queue(&self, item: Result<Completion, LlmError>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(item);
    }

    /// Every request received so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Default for MockCompletionProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for MockCompletionProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(item) => item,
            None => match &self.fallback {
                Some(text) => Ok(Completion::single("mock-model", text.clone())),
                None => Err(LlmError::EmptyCompletion),
            },
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sampling;

    fn request() -> CompletionRequest {
        CompletionRequest::prompt("mock-model", "hello", Sampling::deterministic())
    }

    #[tokio::test]
    async fn test_mock_consumes_script_in_order() {
        let mock = MockCompletionProvider::new();
        mock.queue_text("one");
        mock.queue_error(LlmError::Timeout { timeout_secs: 1 });
        mock.queue_text("two");

        assert_eq!(mock.complete(request()).await.unwrap().text(), "one");
        assert!(mock.complete(request()).await.is_err());
        assert_eq!(mock.complete(request()).await.unwrap().text(), "two");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_without_fallback_errors_when_drained() {
        let mock = MockCompletionProvider::new();
        let err = mock.complete(request()).await.unwrap_err();
        assert!(matches!(err, LlmError::EmptyCompletion));
    }

    #[tokio::test]
    async fn test_mock_fallback_repeats() {
        let mock = MockCompletionProvider::with_response("always");
        for _ in 0..3 {
            assert_eq!(mock.complete(request()).await.unwrap().text(), "always");
        }
        assert_eq!(mock.requests()[0].model, "mock-model");
    }
}
