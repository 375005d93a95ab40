//! HTTP clients for the application under evaluation.
//!
//! The chat endpoint accepts the parts-based message envelope and answers with
//! plain text. The samples and retriever endpoints answer with either a
//! wrapping object (`{"items": [...]}` / `{"results": [...]}`) or a bare list.

use crate::config::TargetConfig;
use crate::error::TargetError;
use crate::types::ChatMessage;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// The conversational endpoint of the target application.
#[async_trait]
pub trait ChatTarget: Send + Sync {
    /// Send the full message history and return the trimmed text reply.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        request_id: Option<&str>,
    ) -> Result<String, TargetError>;
}

/// The retrieval endpoints of the target application.
#[async_trait]
pub trait RetrieverTarget: Send + Sync {
    /// Fetch up to `limit` stored chunks.
    async fn fetch_samples(&self, limit: usize) -> Result<Vec<Value>, TargetError>;

    /// Run the retriever for `question`, returning up to `top_k` chunks.
    async fn retrieve(&self, question: &str, top_k: usize) -> Result<Vec<Value>, TargetError>;
}

/// Build the parts-based envelope the chat endpoint expects.
pub fn chat_envelope(messages: &[ChatMessage]) -> Value {
    let messages: Vec<Value> = messages
        .iter()
        .map(|m| {
            json!({
                "role": m.role.to_string(),
                "parts": [{ "type": "text", "text": m.content }],
            })
        })
        .collect();
    json!({ "messages": messages })
}

/// Accept either `{key: [...]}` or a bare list.
pub fn unwrap_list(data: Value, key: &str) -> Option<Vec<Value>> {
    match data {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

fn request_error(url: &str, timeout: Duration, e: reqwest::Error) -> TargetError {
    if e.is_timeout() {
        TargetError::Timeout {
            url: url.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    } else {
        TargetError::Request {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

/// reqwest-backed chat client.
#[derive(Clone)]
pub struct HttpChatTarget {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpChatTarget {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            timeout,
        }
    }

    /// Client used by the single-turn pipeline.
    pub fn for_single_turn(config: &TargetConfig) -> Self {
        Self::new(
            config.chat_url.clone(),
            Duration::from_secs(config.chat_timeout_secs),
        )
    }

    /// Client used by the conversation runner.
    pub fn for_conversation(config: &TargetConfig) -> Self {
        Self::new(
            config.chat_url.clone(),
            Duration::from_secs(config.conversation_timeout_secs),
        )
    }
}

#[async_trait]
impl ChatTarget for HttpChatTarget {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        request_id: Option<&str>,
    ) -> Result<String, TargetError> {
        let started = Instant::now();
        let mut request = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&chat_envelope(messages));
        if let Some(rid) = request_id {
            request = request.header("X-Request-ID", rid);
        }

        let response = request
            .send()
            .await
            .map_err(|e| request_error(&self.url, self.timeout, e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| request_error(&self.url, self.timeout, e))?;

        info!(
            url = %self.url,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            len = body.len(),
            "Target chat call finished"
        );

        if !status.is_success() {
            return Err(TargetError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        Ok(body.trim().to_string())
    }
}

/// reqwest-backed client for the samples and retriever endpoints.
#[derive(Clone)]
pub struct HttpRetrieverTarget {
    client: Client,
    samples_url: String,
    retriever_url: String,
    timeout: Duration,
}

impl HttpRetrieverTarget {
    pub fn new(config: &TargetConfig) -> Self {
        Self {
            client: Client::new(),
            samples_url: config.samples_url.clone(),
            retriever_url: config.retriever_url.clone(),
            timeout: Duration::from_secs(config.retrieval_timeout_secs),
        }
    }

    async fn post_list(&self, url: &str, body: Value, key: &str) -> Result<Vec<Value>, TargetError> {
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(url, self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TargetError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let data: Value = response.json().await.map_err(|e| TargetError::Payload {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        debug!(url = %url, "Received list payload");

        unwrap_list(data, key).ok_or_else(|| TargetError::Payload {
            url: url.to_string(),
            message: format!("expected a list or an object with a '{}' list", key),
        })
    }
}

#[async_trait]
impl RetrieverTarget for HttpRetrieverTarget {
    async fn fetch_samples(&self, limit: usize) -> Result<Vec<Value>, TargetError> {
        self.post_list(&self.samples_url, json!({ "limit": limit }), "items")
            .await
    }

    async fn retrieve(&self, question: &str, top_k: usize) -> Result<Vec<Value>, TargetError> {
        self.post_list(
            &self.retriever_url,
            json!({ "question": question, "topK": top_k }),
            "results",
        )
        .await
    }
}

/// A scripted chat target for tests.
///
/// Replies are consumed in FIFO order; once drained, the fallback reply is
/// returned, or a `Request` error when there is none.
pub struct MockChatTarget {
    script: Mutex<VecDeque<Result<String, TargetError>>>,
    fallback: Option<Result<String, u16>>,
    received: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockChatTarget {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            received: Mutex::new(Vec::new()),
        }
    }

    /// A target that always answers with `reply`.
    pub fn replying(reply: &str) -> Self {
        Self {
            fallback: Some(Ok(reply.to_string())),
            ..Self::new()
        }
    }

    /// A target that always fails with the given HTTP status.
    pub fn failing(status: u16) -> Self {
        Self {
            fallback: Some(Err(status)),
            ..Self::new()
        }
    }

    pub fn queue_reply(&self, reply: impl Into<String>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(reply.into()));
    }

    pub fn queue_error(&self, error: TargetError) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(error));
    }

    /// Message histories received so far, in call order.
    pub fn received(&self) -> Vec<Vec<ChatMessage>> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.received.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for MockChatTarget {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTarget for MockChatTarget {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _request_id: Option<&str>,
    ) -> Result<String, TargetError> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(item) => item,
            None => match &self.fallback {
                Some(Ok(reply)) => Ok(reply.clone()),
                Some(Err(status)) => Err(TargetError::Status {
                    url: "mock://chat".into(),
                    status: *status,
                }),
                None => Err(TargetError::Request {
                    url: "mock://chat".into(),
                    message: "no scripted reply".into(),
                }),
            },
        }
    }
}
