//! Simulated user utterances.
//!
//! The opening message is sampled with high entropy and steered by random
//! style and topic cues so repeated runs do not converge on the same handful
//! of famous films. Follow-ups use ordinary sampling over the recent history.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use ragprobe_core::{
    ChatMessage, CompletionProvider, CompletionRequest, LlmError, RetryPolicy, Sampling,
    with_retry,
};
use regex::Regex;
use std::sync::{LazyLock, Mutex};
use tracing::debug;

use super::conversation::Conversation;
use super::goals::Goal;
use super::personas::Persona;
use crate::prompts;

/// Number of trailing messages the simulator sees when writing a follow-up.
pub const HISTORY_WINDOW: usize = 6;

pub const FOLLOW_UP_TEMPERATURE: f32 = 0.4;

/// Titles models reach for when asked for "a film"; openings naming them are avoided.
pub const DENYLIST: &[&str] = &[
    "Inception",
    "The Godfather",
    "Titanic",
    "The Shawshank Redemption",
    "Pulp Fiction",
    "The Dark Knight",
    "Forrest Gump",
    "Interstellar",
    "The Matrix",
    "Avatar",
];

const STYLE_CUES: &[&str] = &[
    "casual and slightly hurried",
    "polite and precise",
    "curious, with a short personal aside",
    "skeptical and to the point",
    "chatty, mentioning where they heard about the film",
    "formal, like a short email",
    "lowercase and informal, like a text message",
];

const TOPIC_CUES: &[&str] = &[
    "a 1970s science fiction film",
    "a European art-house drama",
    "an animated feature",
    "a lesser-known thriller",
    "a documentary",
    "a film from the 1950s",
    "a festival award winner",
    "a cult horror film",
    "a film adapted from a novel",
    "a director's debut feature",
];

static ROLE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:\[\s*(?:user|assistant)\s*\]\s*:?|(?:user|assistant)\s*:)\s*")
        .expect("valid role tag regex")
});

/// Sampling for the opening message.
pub fn opening_sampling() -> Sampling {
    Sampling {
        temperature: 1.1,
        top_p: Some(0.95),
        presence_penalty: Some(0.6),
        frequency_penalty: Some(0.6),
        candidates: 4,
        max_tokens: None,
    }
}

/// Remove a leading `USER:` / `[assistant]` style tag and one layer of
/// wrapping quotes.
pub fn clean_utterance(text: &str) -> String {
    let stripped = ROLE_TAG.replace(text, "");
    let trimmed = stripped.trim();
    for (open, close) in [('"', '"'), ('\'', '\''), ('\u{201c}', '\u{201d}')] {
        if trimmed.chars().count() >= 2
            && let Some(inner) = trimmed
                .strip_prefix(open)
                .and_then(|rest| rest.strip_suffix(close))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

pub fn mentions_denylisted(text: &str) -> bool {
    let lower = text.to_lowercase();
    DENYLIST
        .iter()
        .any(|title| lower.contains(&title.to_lowercase()))
}

/// Pick one non-empty candidate uniformly, preferring those that avoid the
/// denylist and falling back to every candidate when none do.
pub fn choose_candidate(candidates: &[String], rng: &mut StdRng) -> Option<String> {
    let usable: Vec<&String> = candidates.iter().filter(|c| !c.trim().is_empty()).collect();
    let preferred: Vec<&String> = usable
        .iter()
        .copied()
        .filter(|c| !mentions_denylisted(c))
        .collect();
    let pool = if preferred.is_empty() { usable } else { preferred };
    pool.choose(rng).map(|c| (*c).clone())
}

pub struct UserSimulator<'a> {
    provider: &'a dyn CompletionProvider,
    model: String,
    retry: RetryPolicy,
    rng: Mutex<StdRng>,
}

impl<'a> UserSimulator<'a> {
    pub fn new(provider: &'a dyn CompletionProvider, model: impl Into<String>, retry: RetryPolicy) -> Self {
        Self::with_rng(provider, model, retry, StdRng::from_entropy())
    }

    /// Deterministic cue and candidate selection.
    pub fn seeded(
        provider: &'a dyn CompletionProvider,
        model: impl Into<String>,
        retry: RetryPolicy,
        seed: u64,
    ) -> Self {
        Self::with_rng(provider, model, retry, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        provider: &'a dyn CompletionProvider,
        model: impl Into<String>,
        retry: RetryPolicy,
        rng: StdRng,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            retry,
            rng: Mutex::new(rng),
        }
    }

    fn rng(&self) -> std::sync::MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Generate the first user message.
    pub async fn opening(&self, persona: &Persona, goal: &Goal) -> Result<String, LlmError> {
        let (style, topic) = {
            let mut rng = self.rng();
            (
                STYLE_CUES.choose(&mut *rng).copied().unwrap_or_default(),
                TOPIC_CUES.choose(&mut *rng).copied().unwrap_or_default(),
            )
        };
        debug!(style, topic, "Opening message cues");

        let messages = vec![
            ChatMessage::system(prompts::opening_system(style, topic, DENYLIST)),
            ChatMessage::user(prompts::opening_user(persona, goal)),
        ];
        let completion = with_retry(&self.retry, "user_sim_opening", || {
            self.provider.complete(CompletionRequest::new(
                self.model.clone(),
                messages.clone(),
                opening_sampling(),
            ))
        })
        .await?;

        let chosen = {
            let mut rng = self.rng();
            choose_candidate(&completion.choices, &mut rng)
        };
        chosen
            .map(|text| clean_utterance(&text))
            .filter(|text| !text.is_empty())
            .ok_or(LlmError::EmptyCompletion)
    }

    /// Generate the next user message from the recent history.
    pub async fn follow_up(
        &self,
        persona: &Persona,
        goal: &Goal,
        conversation: &Conversation,
    ) -> Result<String, LlmError> {
        let history = Conversation::render(conversation.tail(HISTORY_WINDOW), "\n");
        let prompt = prompts::follow_up(persona, goal, &history);
        let completion = with_retry(&self.retry, "user_sim_follow_up", || {
            self.provider.complete(CompletionRequest::prompt(
                self.model.clone(),
                prompt.clone(),
                Sampling::with_temperature(FOLLOW_UP_TEMPERATURE),
            ))
        })
        .await?;
        Ok(clean_utterance(completion.text()))
    }
}
