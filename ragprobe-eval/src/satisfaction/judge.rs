//! Per-turn judge for simulated conversations.

use ragprobe_core::{
    CompletionProvider, CompletionRequest, RetryPolicy, Sampling, parse::parse_json_object,
    with_retry,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::conversation::Conversation;
use super::goals::Goal;
use super::personas::Persona;
use crate::prompts;

pub const MAX_RAW_SCORE: f64 = 3.0;

pub const FALLBACK_REASONING: &str = "Fallback default; could not parse judge JSON.";

/// Raw judge output, scores on the 0..3 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnScores {
    pub user_satisfaction_score: f64,
    pub clarity_score: f64,
    pub relevance_score: f64,
    pub completeness_score: f64,
    pub frustration_incidents: u32,
    pub goal_achieved: bool,
    pub reasoning: String,
}

impl Default for TurnScores {
    fn default() -> Self {
        Self {
            user_satisfaction_score: 1.0,
            clarity_score: 1.0,
            relevance_score: 1.0,
            completeness_score: 1.0,
            frustration_incidents: 0,
            goal_achieved: false,
            reasoning: FALLBACK_REASONING.to_string(),
        }
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn flag(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        _ => None,
    }
}

impl TurnScores {
    /// Read a judge object leniently. Missing or malformed fields keep their
    /// default; scores are clamped to `0..=3`.
    pub fn from_value(value: &Value) -> Self {
        let fallback = Self::default();
        let score = |key: &str, default: f64| {
            number(value.get(key))
                .filter(|v| v.is_finite())
                .unwrap_or(default)
                .clamp(0.0, MAX_RAW_SCORE)
        };
        Self {
            user_satisfaction_score: score("user_satisfaction_score", fallback.user_satisfaction_score),
            clarity_score: score("clarity_score", fallback.clarity_score),
            relevance_score: score("relevance_score", fallback.relevance_score),
            completeness_score: score("completeness_score", fallback.completeness_score),
            frustration_incidents: number(value.get("frustration_incidents"))
                .filter(|v| v.is_finite())
                .map(|v| v.max(0.0).round() as u32)
                .unwrap_or(0),
            goal_achieved: flag(value.get("goal_achieved")).unwrap_or(false),
            reasoning: value
                .get("reasoning")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }

    pub fn normalized(&self) -> TurnMetric {
        TurnMetric {
            user_satisfaction_score: normalize(self.user_satisfaction_score),
            clarity_score: normalize(self.clarity_score),
            relevance_score: normalize(self.relevance_score),
            completeness_score: normalize(self.completeness_score),
            frustration_incidents: self.frustration_incidents,
            goal_achieved: self.goal_achieved,
            reasoning: self.reasoning.clone(),
        }
    }
}

/// Map a 0..3 score onto 0..100.
pub fn normalize(score: f64) -> f64 {
    score / MAX_RAW_SCORE * 100.0
}

/// A judged turn with scores on the 0..100 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnMetric {
    pub user_satisfaction_score: f64,
    pub clarity_score: f64,
    pub relevance_score: f64,
    pub completeness_score: f64,
    pub frustration_incidents: u32,
    pub goal_achieved: bool,
    pub reasoning: String,
}

/// Parse judge text; anything without a usable JSON object yields the default.
pub fn parse_turn_scores(raw: &str) -> TurnScores {
    match parse_json_object(raw) {
        Some(value) => TurnScores::from_value(&value),
        None => {
            warn!(raw_len = raw.len(), "Turn judge output was not JSON; using defaults");
            TurnScores::default()
        }
    }
}

pub struct TurnJudge<'a> {
    provider: &'a dyn CompletionProvider,
    model: String,
    retry: RetryPolicy,
}

impl<'a> TurnJudge<'a> {
    pub fn new(provider: &'a dyn CompletionProvider, model: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            model: model.into(),
            retry,
        }
    }

    /// Score the conversation so far. Never fails.
    pub async fn evaluate(&self, persona: &Persona, goal: &Goal, conversation: &Conversation) -> TurnScores {
        let transcript = Conversation::render(conversation.messages(), "\n\n");
        let prompt = prompts::turn_judge(persona, goal, &transcript);
        let result = with_retry(&self.retry, "turn_judge", || {
            self.provider.complete(CompletionRequest::prompt(
                self.model.clone(),
                prompt.clone(),
                Sampling::deterministic(),
            ))
        })
        .await;

        match result {
            Ok(completion) => parse_turn_scores(completion.text()),
            Err(e) => {
                warn!(error = %e, "Turn judge failed; using defaults");
                TurnScores::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::satisfaction::{goal, persona};
    use pretty_assertions::assert_eq;
    use ragprobe_core::{LlmError, MockCompletionProvider};
    use serde_json::json;

    #[test]
    fn test_parse_wrapped_json() {
        let raw = "Here you go:\n{\"user_satisfaction_score\": 3, \"clarity_score\": 2, \
                   \"relevance_score\": 3, \"completeness_score\": 2, \
                   \"frustration_incidents\": 1, \"goal_achieved\": true, \"reasoning\": \"good\"}";
        let scores = parse_turn_scores(raw);
        assert_eq!(scores.user_satisfaction_score, 3.0);
        assert_eq!(scores.frustration_incidents, 1);
        assert!(scores.goal_achieved);
        assert_eq!(scores.reasoning, "good");
    }

    #[test]
    fn test_garbage_falls_back_to_defaults() {
        let scores = parse_turn_scores("I think it went fine.");
        assert_eq!(scores, TurnScores::default());
        assert_eq!(scores.reasoning, FALLBACK_REASONING);
    }

    #[test]
    fn test_lenient_fields_are_clamped() {
        let scores = TurnScores::from_value(&json!({
            "user_satisfaction_score": 7,
            "clarity_score": "2",
            "relevance_score": -1,
            "frustration_incidents": -3,
            "goal_achieved": "yes",
        }));
        assert_eq!(scores.user_satisfaction_score, 3.0);
        assert_eq!(scores.clarity_score, 2.0);
        assert_eq!(scores.relevance_score, 0.0);
        assert_eq!(scores.completeness_score, 1.0);
        assert_eq!(scores.frustration_incidents, 0);
        assert!(scores.goal_achieved);
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize(3.0), 100.0);
        assert_eq!(normalize(0.0), 0.0);
        let metric = TurnScores::default().normalized();
        assert!((metric.clarity_score - 33.333).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_provider_failure_yields_defaults() {
        let provider = MockCompletionProvider::new();
        provider.queue_error(LlmError::Timeout { timeout_secs: 60 });
        let judge = TurnJudge::new(&provider, "judge", RetryPolicy::once());
        let mut convo = Conversation::new();
        convo.push_user("hi");
        convo.push_assistant("hello");
        let scores = judge
            .evaluate(persona("curious_novice").unwrap(), goal("specific-memory-recall").unwrap(), &convo)
            .await;
        assert_eq!(scores, TurnScores::default());
    }
}
