//! Tolerant parsing of model output.
//!
//! Models are asked for strict JSON but routinely wrap it in code fences, add
//! prose around it, use single quotes, or ignore the format entirely. Every
//! function here walks an ordered cascade of strategies and ends in a safe
//! default, so parsing never fails.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;
use tracing::warn;

/// Maximum number of characters of unparseable output included in warnings.
pub const WARN_PREVIEW_CHARS: usize = 800;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^```(?:json)?\s*|\s*```$").expect("valid code fence regex")
});

static QUESTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:\d+\s*[.)]\s*)?Q(?:uestion)?\s*[:\-]\s*(.*)$")
        .expect("valid question regex")
});

static ANSWER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*A(?:nswer)?\s*[:\-]\s*(.*)$").expect("valid answer regex")
});

/// Remove a leading ```` ``` ```` / ```` ```json ```` fence and a trailing fence.
pub fn strip_code_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text.trim(), "").trim().to_string()
}

/// The substring between the first `{` and the last `}`, if both exist in order.
pub fn inner_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// One way of turning fence-stripped model text into JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonStrategy {
    /// Parse the text as-is.
    Direct,
    /// Parse the outermost `{...}` block.
    InnerBlock,
    /// Replace single quotes with double quotes and parse.
    QuoteCoercion,
}

impl JsonStrategy {
    /// The full cascade, in the order it is attempted.
    pub const CASCADE: [JsonStrategy; 3] = [
        JsonStrategy::Direct,
        JsonStrategy::InnerBlock,
        JsonStrategy::QuoteCoercion,
    ];

    pub fn apply(self, text: &str) -> Option<Value> {
        match self {
            JsonStrategy::Direct => serde_json::from_str(text).ok(),
            JsonStrategy::InnerBlock => {
                inner_json_block(text).and_then(|block| serde_json::from_str(block).ok())
            }
            JsonStrategy::QuoteCoercion => serde_json::from_str(&text.replace('\'', "\"")).ok(),
        }
    }
}

/// Run `strategies` in order over fence-stripped `text`, returning the first
/// value that parses and that `extract` accepts.
pub fn first_usable<T>(
    text: &str,
    strategies: &[JsonStrategy],
    extract: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    let stripped = strip_code_fences(text);
    strategies
        .iter()
        .filter_map(|strategy| strategy.apply(&stripped))
        .find_map(|value| extract(&value))
}

/// A generated question/answer pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

impl QaPair {
    fn non_empty(question: &str, answer: &str) -> Option<Self> {
        let question = question.trim();
        let answer = answer.trim();
        (!question.is_empty() && !answer.is_empty()).then(|| Self {
            question: question.to_string(),
            answer: answer.to_string(),
        })
    }
}

fn field_text(item: &Value, key: &str) -> String {
    match item.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn pairs_from_json(value: &Value) -> Option<Vec<QaPair>> {
    let items = value.get("pairs")?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| QaPair::non_empty(&field_text(item, "question"), &field_text(item, "answer")))
            .collect(),
    )
}

/// Line-oriented `Q:` / `A:` extraction.
///
/// A question line may carry a list number (`1. Q: ...`). Lines that follow a
/// question or answer line without a new marker continue that field.
pub fn parse_qa_blocks(text: &str) -> Vec<QaPair> {
    let mut pairs = Vec::new();
    let mut question: Option<String> = None;
    let mut answer: Option<String> = None;

    let mut flush = |question: &mut Option<String>, answer: &mut Option<String>| {
        if let (Some(q), Some(a)) = (question.take(), answer.take())
            && let Some(pair) = QaPair::non_empty(&q, &a)
        {
            pairs.push(pair);
        }
    };

    for line in text.lines() {
        if let Some(caps) = QUESTION_LINE.captures(line) {
            flush(&mut question, &mut answer);
            question = Some(caps[1].to_string());
            answer = None;
        } else if question.is_some()
            && answer.is_none()
            && let Some(caps) = ANSWER_LINE.captures(line)
        {
            answer = Some(caps[1].to_string());
        } else if let Some(a) = answer.as_mut() {
            a.push('\n');
            a.push_str(line);
        } else if let Some(q) = question.as_mut() {
            q.push('\n');
            q.push_str(line);
        }
    }
    flush(&mut question, &mut answer);
    pairs
}

/// Parse generated question/answer pairs.
///
/// JSON of the form `{"pairs": [{"question", "answer"}]}` is tried through the
/// full [`JsonStrategy::CASCADE`]; otherwise the `Q:`/`A:` fallback is used and
/// capped at `expected` pairs. Pairs with an empty question or answer are
/// dropped. Returns an empty list when nothing is recognizable.
pub fn parse_pairs(raw: &str, expected: usize) -> Vec<QaPair> {
    if let Some(pairs) = first_usable(raw, &JsonStrategy::CASCADE, pairs_from_json) {
        return pairs;
    }

    let stripped = strip_code_fences(raw);
    let mut pairs = parse_qa_blocks(&stripped);
    if !pairs.is_empty() {
        pairs.truncate(expected);
        return pairs;
    }

    warn!(
        raw = %preview(&stripped, WARN_PREVIEW_CHARS),
        "Could not parse dataset pairs"
    );
    Vec::new()
}

/// Parse a JSON object with the direct and `{...}` strategies only.
pub fn parse_json_object(raw: &str) -> Option<Value> {
    first_usable(
        raw,
        &[JsonStrategy::Direct, JsonStrategy::InnerBlock],
        |value| value.is_object().then(|| value.clone()),
    )
}

/// A judge decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Correct,
    Incorrect,
    Relevant,
    Irrelevant,
    Unknown,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Correct => "CORRECT",
            Decision::Incorrect => "INCORRECT",
            Decision::Relevant => "RELEVANT",
            Decision::Irrelevant => "IRRELEVANT",
            Decision::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which question the judge was asked; determines the accepted vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeKind {
    Correctness,
    Relevance,
}

static CORRECTNESS_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(INCORRECT|CORRECT)\b").expect("valid token regex"));

static RELEVANCE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(IRRELEVANT|RELEVANT)\b").expect("valid token regex"));

static CORRECTNESS_DECISION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)DECISION:\s*(INCORRECT|CORRECT)").expect("valid decision regex")
});

static RELEVANCE_DECISION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)DECISION:\s*(IRRELEVANT|RELEVANT)").expect("valid decision regex")
});

impl JudgeKind {
    /// The decisions this judge may return, positive first.
    pub fn vocabulary(&self) -> [Decision; 2] {
        match self {
            JudgeKind::Correctness => [Decision::Correct, Decision::Incorrect],
            JudgeKind::Relevance => [Decision::Relevant, Decision::Irrelevant],
        }
    }

    /// The decision that counts toward the summary rate.
    pub fn positive(&self) -> Decision {
        self.vocabulary()[0]
    }

    /// Map a free-form token onto this judge's vocabulary.
    pub fn decision_from(&self, token: &str) -> Option<Decision> {
        let token = token
            .trim()
            .trim_matches(|c: char| !c.is_ascii_alphabetic())
            .to_ascii_uppercase();
        self.vocabulary()
            .into_iter()
            .find(|decision| decision.as_str() == token)
    }

    fn token_regex(&self) -> &'static Regex {
        match self {
            JudgeKind::Correctness => &CORRECTNESS_TOKEN,
            JudgeKind::Relevance => &RELEVANCE_TOKEN,
        }
    }

    fn decision_regex(&self) -> &'static Regex {
        match self {
            JudgeKind::Correctness => &CORRECTNESS_DECISION,
            JudgeKind::Relevance => &RELEVANCE_DECISION,
        }
    }
}

/// A parsed judge answer. `raw` is always the untouched model output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub raw: String,
    pub reasoning: String,
    pub decision: Decision,
}

impl Verdict {
    pub fn unknown(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            reasoning: String::new(),
            decision: Decision::Unknown,
        }
    }
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Parse a judge answer into a [`Verdict`].
///
/// Order: JSON (`decision`/`DECISION`, `reasoning`/`REASONING`) through the
/// full strategy cascade, then a `REASONING:`/`DECISION:` line scan, then a
/// `DECISION: <token>` search, then the first bare vocabulary token anywhere
/// in the text. Tokens outside the judge's vocabulary are ignored. When all of
/// that fails the decision is [`Decision::Unknown`].
pub fn parse_verdict(raw: &str, kind: JudgeKind) -> Verdict {
    let from_json = first_usable(raw, &JsonStrategy::CASCADE, |value| {
        let token = string_field(value, &["decision", "DECISION"])?;
        let decision = kind.decision_from(&token)?;
        let reasoning = string_field(value, &["reasoning", "REASONING"]).unwrap_or_default();
        Some((reasoning, decision))
    });
    if let Some((reasoning, decision)) = from_json {
        return Verdict {
            raw: raw.to_string(),
            reasoning,
            decision,
        };
    }

    let mut reasoning = String::new();
    let mut decision = None;
    for line in raw.lines() {
        let trimmed = line.trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper.starts_with("REASONING:") {
            reasoning = trimmed["REASONING:".len()..].trim().to_string();
        } else if upper.starts_with("DECISION:") {
            decision = kind.decision_from(&trimmed["DECISION:".len()..]).or(decision);
        }
    }

    let decision = decision
        .or_else(|| {
            kind.decision_regex()
                .captures(raw)
                .and_then(|caps| kind.decision_from(&caps[1]))
        })
        .or_else(|| {
            kind.token_regex()
                .captures(raw)
                .and_then(|caps| kind.decision_from(&caps[1]))
        });

    match decision {
        Some(decision) => Verdict {
            raw: raw.to_string(),
            reasoning,
            decision,
        },
        None => {
            warn!(
                raw = %preview(raw, WARN_PREVIEW_CHARS),
                "Judge answer carries no decision"
            );
            Verdict {
                raw: raw.to_string(),
                reasoning,
                decision: Decision::Unknown,
            }
        }
    }
}
