//! Single-turn question/answer evaluation.
//!
//! Each golden sample is asked of the target chat endpoint, then two
//! independent judges grade the reply for correctness and relevance.

use ragprobe_core::{
    ChatMessage, ChatTarget, CompletionProvider, CompletionRequest, Decision, JudgeKind,
    RetryPolicy, Sampling, Verdict, parse_verdict, with_retry,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{error, info};

use crate::dataset::Sample;
use crate::progress::{Phase, Progress, ProgressSink};
use crate::prompts;

/// Prefix of the candidate text recorded when the target could not be reached.
pub const CHAT_ERROR_MARKER: &str = "[ERROR calling app chat]";

/// Prefix of the verdict `raw` text recorded when the judge could not be reached.
pub const JUDGE_ERROR_MARKER: &str = "[ERROR calling judge]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationDetail {
    pub source: String,
    pub question: String,
    pub ground_truth: String,
    pub candidate: String,
    pub correctness: Verdict,
    pub relevance: Verdict,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub total: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub relevant: usize,
    pub relevance_rate: f64,
    pub details: Vec<EvaluationDetail>,
}

impl EvaluationSummary {
    pub fn from_details(details: Vec<EvaluationDetail>) -> Self {
        let total = details.len();
        let correct = details
            .iter()
            .filter(|d| d.correctness.decision == Decision::Correct)
            .count();
        let relevant = details
            .iter()
            .filter(|d| d.relevance.decision == Decision::Relevant)
            .count();
        Self {
            total,
            correct,
            accuracy: rate(correct, total),
            relevant,
            relevance_rate: rate(relevant, total),
            details,
        }
    }
}

fn rate(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

pub struct SingleTurnEvaluator<'a> {
    provider: &'a dyn CompletionProvider,
    target: &'a dyn ChatTarget,
    judge_model: String,
    model_retry: RetryPolicy,
    ask_retry: RetryPolicy,
}

impl<'a> SingleTurnEvaluator<'a> {
    pub fn new(
        provider: &'a dyn CompletionProvider,
        target: &'a dyn ChatTarget,
        judge_model: impl Into<String>,
        model_retry: RetryPolicy,
        ask_retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            target,
            judge_model: judge_model.into(),
            model_retry,
            ask_retry,
        }
    }

    /// Ask the target; exhausted retries yield the error marker instead.
    pub async fn ask(&self, question: &str, rid: Option<&str>) -> String {
        let messages = vec![ChatMessage::user(question)];
        match with_retry(&self.ask_retry, "ask_application", || {
            self.target.chat(&messages, rid)
        })
        .await
        {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "Target chat failed");
                format!("{CHAT_ERROR_MARKER} {e}")
            }
        }
    }

    /// Run one judge. Exhausted retries yield an `UNKNOWN` verdict whose
    /// `raw` carries the error.
    pub async fn judge(&self, kind: JudgeKind, sample: &Sample, candidate: &str) -> Verdict {
        let system = match kind {
            JudgeKind::Correctness => prompts::CORRECTNESS_JUDGE,
            JudgeKind::Relevance => prompts::RELEVANCE_JUDGE,
        };
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user(prompts::judge_user(&sample.question, &sample.answer, candidate)),
        ];
        let started = Instant::now();
        let result = with_retry(&self.model_retry, "judge", || {
            self.provider.complete(CompletionRequest::new(
                self.judge_model.clone(),
                messages.clone(),
                Sampling::deterministic(),
            ))
        })
        .await;

        match result {
            Ok(completion) => {
                info!(
                    judge = ?kind,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Judge answered"
                );
                parse_verdict(completion.text(), kind)
            }
            Err(e) => {
                error!(judge = ?kind, error = %e, "Judge failed; recording UNKNOWN");
                Verdict::unknown(format!("{JUDGE_ERROR_MARKER} {e}"))
            }
        }
    }

    /// Evaluate every sample in order.
    ///
    /// Progress is reported as `(n, samples.len(), "evaluation")`; callers
    /// chaining this after dataset generation wrap `progress` in
    /// [`crate::progress::Chained`].
    pub async fn evaluate(
        &self,
        samples: &[Sample],
        rid: Option<&str>,
        progress: &dyn ProgressSink,
    ) -> EvaluationSummary {
        let total = samples.len();
        info!(total, "Evaluating samples");

        let mut details = Vec::with_capacity(total);
        let mut correct = 0usize;
        let mut relevant = 0usize;

        for (idx, sample) in samples.iter().enumerate() {
            let i = idx + 1;
            let started = Instant::now();

            let candidate = self.ask(&sample.question, rid).await;
            let correctness = self.judge(JudgeKind::Correctness, sample, &candidate).await;
            let relevance = self.judge(JudgeKind::Relevance, sample, &candidate).await;

            if correctness.decision == Decision::Correct {
                correct += 1;
            }
            if relevance.decision == Decision::Relevant {
                relevant += 1;
            }

            let latency_ms = started.elapsed().as_millis() as u64;
            if i % 5 == 0 || i == total {
                info!(
                    i,
                    of = total,
                    correct,
                    relevant,
                    last_step_ms = latency_ms,
                    "Evaluation progress"
                );
            }

            details.push(EvaluationDetail {
                source: sample.source.clone(),
                question: sample.question.clone(),
                ground_truth: sample.answer.clone(),
                candidate,
                correctness,
                relevance,
                latency_ms,
            });
            progress.report(Progress::new(i, total, Phase::Evaluation));
        }

        EvaluationSummary::from_details(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use pretty_assertions::assert_eq;
    use ragprobe_core::{LlmError, MockChatTarget, MockCompletionProvider};

    fn sample(n: usize) -> Sample {
        Sample {
            source: "movies.txt".into(),
            question: format!("question {n}"),
            answer: format!("answer {n}"),
        }
    }

    #[test]
    fn test_empty_summary_rates_are_zero() {
        let summary = EvaluationSummary::from_details(vec![]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.accuracy, 0.0);
        assert_eq!(summary.relevance_rate, 0.0);
    }

    #[tokio::test]
    async fn test_correct_and_relevant_sample() {
        let provider = MockCompletionProvider::new();
        provider.queue_text(r#"{"reasoning":"all facts present","decision":"CORRECT"}"#);
        provider.queue_text("REASONING: on topic\nDECISION: RELEVANT");
        let target = MockChatTarget::replying("answer 1");

        let evaluator = SingleTurnEvaluator::new(
            &provider,
            &target,
            "judge",
            RetryPolicy::once(),
            RetryPolicy::once(),
        );
        let summary = evaluator.evaluate(&[sample(1)], Some("rid"), &NoProgress).await;
        assert_eq!(summary.total, 1);
        assert_eq!(summary.accuracy, 1.0);
        assert_eq!(summary.relevance_rate, 1.0);
        assert_eq!(summary.details[0].correctness.reasoning, "all facts present");
        assert_eq!(summary.details[0].candidate, "answer 1");
    }

    #[tokio::test]
    async fn test_judge_failure_is_contained() {
        let provider = MockCompletionProvider::new();
        provider.queue_error(LlmError::RateLimited { retry_after_secs: 1 });
        provider.queue_text(r#"{"decision":"IRRELEVANT"}"#);
        let target = MockChatTarget::replying("whatever");

        let evaluator = SingleTurnEvaluator::new(
            &provider,
            &target,
            "judge",
            RetryPolicy::once(),
            RetryPolicy::once(),
        );
        let summary = evaluator.evaluate(&[sample(1)], None, &NoProgress).await;
        let detail = &summary.details[0];
        assert_eq!(detail.correctness.decision, Decision::Unknown);
        assert!(detail.correctness.raw.starts_with(JUDGE_ERROR_MARKER));
        assert_eq!(detail.relevance.decision, Decision::Irrelevant);
    }
}
