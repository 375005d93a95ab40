//! OpenAI-compatible completion provider.
//!
//! Supports OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio, and any endpoint
//! that follows the OpenAI chat completions API format.

use crate::brain::CompletionProvider;
use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::types::{ChatMessage, Completion, CompletionRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

/// OpenAI-compatible completion provider.
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    timeout_secs: u64,
}

impl OpenAiCompatibleProvider {
    /// Create a new provider from configuration.
    ///
    /// Reads the API key from the environment variable named in `config.api_key_env`.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let is_local = config
            .base_url
            .as_ref()
            .map(|u| u.contains("localhost") || u.contains("127.0.0.1"))
            .unwrap_or(false);

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .or_else(|| {
                if is_local {
                    debug!("No API key set for local provider; using dummy bearer token");
                    Some("local".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| LlmError::AuthFailed {
                provider: format!(
                    "OpenAI-compatible: env var '{}' not set",
                    config.api_key_env
                ),
            })?;
        Self::new_with_key(config, api_key)
    }

    /// Create a new provider with an explicitly provided API key.
    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LlmError::ApiRequest {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            timeout_secs: config.timeout_secs,
        })
    }

    fn messages_to_json(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| json!({ "role": msg.role.to_string(), "content": msg.content }))
            .collect()
    }

    fn request_body(request: &CompletionRequest) -> Value {
        let sampling = &request.sampling;
        let mut body = json!({
            "model": request.model,
            "messages": Self::messages_to_json(&request.messages),
            "temperature": sampling.temperature,
            "stream": false,
        });
        if sampling.candidates > 1 {
            body["n"] = json!(sampling.candidates);
        }
        if let Some(top_p) = sampling.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(presence) = sampling.presence_penalty {
            body["presence_penalty"] = json!(presence);
        }
        if let Some(frequency) = sampling.frequency_penalty {
            body["frequency_penalty"] = json!(frequency);
        }
        if let Some(max_tokens) = sampling.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    /// Extract every choice's text. A `null` content is treated as an empty string.
    fn parse_response(body: &Value, requested_model: &str) -> Result<Completion, LlmError> {
        let choices = body
            .get("choices")
            .and_then(|c| c.as_array())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No choices in response".to_string(),
            })?;

        let texts = choices
            .iter()
            .map(|choice| {
                choice
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(|c| c.as_str())
                    .unwrap_or_default()
                    .to_string()
            })
            .collect();

        let model = body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(requested_model)
            .to_string();

        Ok(Completion {
            model,
            choices: texts,
        })
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, "Authentication failed");
                LlmError::AuthFailed {
                    provider: "OpenAI-compatible".to_string(),
                }
            }
            429 => {
                // "Rate limit reached ... Please try again in 7s."
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        msg.split("in ").last().and_then(|s| {
                            s.trim_end_matches('.')
                                .trim_end_matches('s')
                                .parse::<f64>()
                                .ok()
                        })
                    })
                    .map(|secs| secs.ceil() as u64)
                    .unwrap_or(5);
                LlmError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            status if status >= 500 => LlmError::ApiRequest {
                message: format!("Server error ({}): {}", status, body),
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {}: {}", status, body),
            },
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request);

        debug!(url = %url, model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    LlmError::ApiRequest {
                        message: format!("Request failed: {}", e),
                    }
                }
            })?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| LlmError::ApiRequest {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON: {}", e),
            })?;

        Self::parse_response(&json, &request.model)
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sampling;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> LlmConfig {
        LlmConfig {
            base_url: Some(server.uri()),
            timeout_secs: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_request_body_includes_entropy_knobs() {
        let request = CompletionRequest::prompt(
            "gpt-4o-mini",
            "hi",
            Sampling {
                temperature: 1.1,
                top_p: Some(0.95),
                presence_penalty: Some(0.6),
                frequency_penalty: Some(0.5),
                candidates: 4,
                max_tokens: Some(120),
            },
        );
        let body = OpenAiCompatibleProvider::request_body(&request);
        assert_eq!(body["n"], 4);
        assert!(body.get("top_p").is_some());
        assert!(body.get("presence_penalty").is_some());
        assert!(body.get("frequency_penalty").is_some());
        assert_eq!(body["max_tokens"], 120);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_request_body_single_candidate_omits_n() {
        let request = CompletionRequest::prompt("m", "hi", Sampling::deterministic());
        let body = OpenAiCompatibleProvider::request_body(&request);
        assert!(body.get("n").is_none());
        assert!(body.get("top_p").is_none());
    }

    #[test]
    fn test_parse_response_collects_all_choices() {
        let body = json!({
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [
                {"message": {"content": "first"}},
                {"message": {"content": null}},
                {"message": {"content": "third"}}
            ]
        });
        let completion = OpenAiCompatibleProvider::parse_response(&body, "gpt-4o-mini").unwrap();
        assert_eq!(completion.choices, vec!["first", "", "third"]);
        assert_eq!(completion.model, "gpt-4o-mini-2024-07-18");
    }

    #[test]
    fn test_parse_response_without_choices() {
        let err = OpenAiCompatibleProvider::parse_response(&json!({"choices": []}), "m").unwrap_err();
        assert!(matches!(err, LlmError::ResponseParse { .. }));
    }

    #[test]
    fn test_map_http_error_rate_limit() {
        let body = r#"{"error":{"message":"Rate limit reached. Please try again in 7s"}}"#;
        match OpenAiCompatibleProvider::map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, body) {
            LlmError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, 7),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_complete_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gpt-4o-mini",
                "choices": [{"message": {"role": "assistant", "content": "  pong  "}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider =
            OpenAiCompatibleProvider::new_with_key(&config_for(&server), "sk-test".into()).unwrap();
        let completion = provider
            .complete(CompletionRequest::prompt(
                "gpt-4o-mini",
                "ping",
                Sampling::deterministic(),
            ))
            .await
            .unwrap();
        assert_eq!(completion.text(), "pong");
    }

    #[tokio::test]
    async fn test_complete_maps_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider =
            OpenAiCompatibleProvider::new_with_key(&config_for(&server), "sk-test".into()).unwrap();
        let err = provider
            .complete(CompletionRequest::prompt("m", "ping", Sampling::deterministic()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_local_provider_needs_no_key() {
        let config = LlmConfig {
            api_key_env: "RAGPROBE_TEST_UNSET_KEY_VAR".into(),
            base_url: Some("http://localhost:11434/v1".into()),
            ..Default::default()
        };
        assert!(OpenAiCompatibleProvider::new(&config).is_ok());
    }

    #[test]
    fn test_remote_provider_requires_key() {
        let config = LlmConfig {
            api_key_env: "RAGPROBE_TEST_UNSET_KEY_VAR".into(),
            base_url: None,
            ..Default::default()
        };
        assert!(matches!(
            OpenAiCompatibleProvider::new(&config),
            Err(LlmError::AuthFailed { .. })
        ));
    }
}
