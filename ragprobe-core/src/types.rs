//! Message types shared by the model provider and the target application client.

use serde::{Deserialize, Serialize};

/// A participant role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single role-tagged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Sampling parameters for a completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sampling {
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    /// Number of candidate completions requested.
    pub candidates: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: None,
            presence_penalty: None,
            frequency_penalty: None,
            candidates: 1,
            max_tokens: None,
        }
    }
}

impl Sampling {
    /// Single candidate at the given temperature.
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature,
            ..Default::default()
        }
    }

    /// Temperature zero, used for dataset generation and judging.
    pub fn deterministic() -> Self {
        Self::with_temperature(0.0)
    }
}

/// A request to the model for completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub sampling: Sampling,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>, sampling: Sampling) -> Self {
        Self {
            model: model.into(),
            messages,
            sampling,
        }
    }

    /// Shorthand for a one-message user prompt.
    pub fn prompt(model: impl Into<String>, prompt: impl Into<String>, sampling: Sampling) -> Self {
        Self::new(model, vec![ChatMessage::user(prompt)], sampling)
    }
}

/// The provider's answer: one text per returned choice, in provider order.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub model: String,
    pub choices: Vec<String>,
}

impl Completion {
    pub fn single(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            choices: vec![text.into()],
        }
    }

    /// The first choice, trimmed; empty when the provider returned nothing.
    pub fn text(&self) -> &str {
        self.choices.first().map(|s| s.trim()).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn test_completion_text_trims_first_choice() {
        let completion = Completion {
            model: "m".into(),
            choices: vec!["  first \n".into(), "second".into()],
        };
        assert_eq!(completion.text(), "first");
    }

    #[test]
    fn test_completion_text_empty() {
        let completion = Completion {
            model: "m".into(),
            choices: vec![],
        };
        assert_eq!(completion.text(), "");
    }

    #[test]
    fn test_sampling_deterministic() {
        let sampling = Sampling::deterministic();
        assert_eq!(sampling.temperature, 0.0);
        assert_eq!(sampling.candidates, 1);
        assert!(sampling.top_p.is_none());
    }
}
