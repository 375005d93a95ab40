//! Retriever-level evaluation.
//!
//! For every sampled chunk the dataset model writes one query the chunk should
//! answer; the retriever is then asked that query and the run checks whether
//! the source chunk came back.

use ragprobe_core::{CompletionProvider, CompletionRequest, RetrieverTarget, Sampling};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::progress::{Phase, Progress, ProgressSink};
use crate::prompts;

/// Preview length, including the trailing `...`.
pub const PREVIEW_CHARS: usize = 120;

/// Temperature used for query generation.
pub const QUERY_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalDetail {
    /// The source's `metadata.chunk_index`, or its `id` when it has none.
    pub source_chunk_index: Value,
    pub generated_query: String,
    /// Retrieved chunk indices, or retrieved ids when no result carried an index.
    pub retrieved_chunk_indices: Vec<Value>,
    #[serde(rename = "match")]
    pub matched: bool,
    pub source_preview: String,
    pub result_preview: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMetrics {
    pub precision: f64,
    /// Equal to `precision`: the size of the full relevant set is not observable.
    pub recall: f64,
    pub f1_score: f64,
    pub total_queries: usize,
    pub relevant_retrieved: usize,
}

impl RetrievalMetrics {
    pub fn from_counts(matches: usize, total: usize) -> Self {
        let precision = if total == 0 {
            0.0
        } else {
            matches as f64 / total as f64
        };
        let recall = precision;
        let f1_score = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            f1_score,
            total_queries: total,
            relevant_retrieved: matches,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalReport {
    pub metrics: RetrievalMetrics,
    pub details: Vec<RetrievalDetail>,
}

/// Cut to [`PREVIEW_CHARS`] characters, ending in `...` when shortened.
pub fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(PREVIEW_CHARS - 3).collect();
    format!("{head}...")
}

fn chunk_text(item: &Value) -> Option<&str> {
    ["text", "content"]
        .iter()
        .filter_map(|key| item.get(*key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

fn chunk_index(item: &Value) -> Option<&Value> {
    item.get("metadata")
        .filter(|m| m.is_object())
        .and_then(|m| m.get("chunk_index"))
        .filter(|v| !v.is_null())
}

fn chunk_id(item: &Value) -> Option<&Value> {
    item.get("id").filter(|v| !v.is_null())
}

/// Outcome of comparing one source chunk against the retriever's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub source_key: Value,
    pub retrieved: Vec<Value>,
    pub matched: bool,
}

/// Key equality where `3` and `3.0` are the same chunk.
fn same_key(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Match on `metadata.chunk_index` when the source has one, else on `id`.
pub fn match_source(source: &Value, retrieved: &[Value]) -> MatchOutcome {
    let indices: Vec<Value> = retrieved.iter().filter_map(chunk_index).cloned().collect();
    let ids: Vec<Value> = retrieved
        .iter()
        .map(|item| item.get("id").cloned().unwrap_or(Value::Null))
        .collect();

    let (source_key, matched) = match (chunk_index(source), chunk_id(source)) {
        (Some(idx), _) => (idx.clone(), indices.iter().any(|v| same_key(v, idx))),
        (None, Some(id)) => (id.clone(), ids.iter().any(|v| same_key(v, id))),
        (None, None) => (Value::Null, false),
    };

    MatchOutcome {
        source_key,
        retrieved: if indices.is_empty() { ids } else { indices },
        matched,
    }
}

pub struct RetrievalEvaluator<'a> {
    provider: &'a dyn CompletionProvider,
    retriever: &'a dyn RetrieverTarget,
    model: String,
}

impl<'a> RetrievalEvaluator<'a> {
    pub fn new(
        provider: &'a dyn CompletionProvider,
        retriever: &'a dyn RetrieverTarget,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            retriever,
            model: model.into(),
        }
    }

    /// One completion call, no retries.
    pub async fn generate_query(&self, text: &str) -> Result<String, ragprobe_core::LlmError> {
        let completion = self
            .provider
            .complete(CompletionRequest::prompt(
                self.model.clone(),
                prompts::retrieval_query(text),
                Sampling::with_temperature(QUERY_TEMPERATURE),
            ))
            .await?;
        Ok(completion.text().to_string())
    }

    /// Evaluate up to `limit` sampled chunks with the given `top_k`.
    ///
    /// External failures never abort the run: an unreachable samples endpoint
    /// yields an empty report, a failed query generation skips the chunk, and
    /// a failed retriever call counts as an empty result.
    pub async fn evaluate(
        &self,
        top_k: usize,
        limit: usize,
        progress: &dyn ProgressSink,
    ) -> RetrievalReport {
        let samples = match self.retriever.fetch_samples(limit).await {
            Ok(samples) => samples,
            Err(e) => {
                error!(error = %e, "Failed to fetch samples");
                Vec::new()
            }
        };
        info!(samples = samples.len(), top_k, "Evaluating retriever");

        let mut details = Vec::new();
        let mut matches = 0usize;
        let of = samples.len();

        for (idx, sample) in samples.iter().enumerate() {
            let step = idx + 1;
            let Some(text) = chunk_text(sample) else {
                progress.report(Progress::new(step, of, Phase::Retrieval));
                continue;
            };

            let query = match self.generate_query(text).await {
                Ok(query) => query,
                Err(e) => {
                    error!(error = %e, "Query generation failed; skipping chunk");
                    progress.report(Progress::new(step, of, Phase::Retrieval));
                    continue;
                }
            };

            let retrieved = match self.retriever.retrieve(&query, top_k).await {
                Ok(results) => results,
                Err(e) => {
                    warn!(error = %e, "Retriever request failed");
                    Vec::new()
                }
            };

            let outcome = match_source(sample, &retrieved);
            if outcome.matched {
                matches += 1;
            }
            let result_preview = retrieved
                .first()
                .and_then(|r| r.get("content"))
                .and_then(Value::as_str)
                .map(preview)
                .unwrap_or_default();

            details.push(RetrievalDetail {
                source_chunk_index: outcome.source_key,
                generated_query: query,
                retrieved_chunk_indices: outcome.retrieved,
                matched: outcome.matched,
                source_preview: preview(text),
                result_preview,
            });
            progress.report(Progress::new(step, of, Phase::Retrieval));
        }

        let metrics = RetrievalMetrics::from_counts(matches, details.len());
        info!(
            precision = metrics.precision,
            total_queries = metrics.total_queries,
            "Retriever evaluation finished"
        );
        RetrievalReport { metrics, details }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use ragprobe_core::{LlmError, MockCompletionProvider, TargetError};
    use serde_json::json;

    struct FixedRetriever {
        samples: Result<Vec<Value>, u16>,
        results: Vec<Value>,
    }

    #[async_trait]
    impl RetrieverTarget for FixedRetriever {
        async fn fetch_samples(&self, _limit: usize) -> Result<Vec<Value>, TargetError> {
            self.samples.clone().map_err(|status| TargetError::Status {
                url: "mock://samples".into(),
                status,
            })
        }

        async fn retrieve(&self, _question: &str, _top_k: usize) -> Result<Vec<Value>, TargetError> {
            Ok(self.results.clone())
        }
    }

    #[test]
    fn test_match_by_chunk_index() {
        let source = json!({"id": "x", "metadata": {"chunk_index": 3}});
        let hit = [json!({"metadata": {"chunk_index": 1}}), json!({"metadata": {"chunk_index": 3}})];
        let miss = [json!({"metadata": {"chunk_index": 1}})];
        assert!(match_source(&source, &hit).matched);
        assert!(!match_source(&source, &miss).matched);
        assert_eq!(match_source(&source, &hit).retrieved, vec![json!(1), json!(3)]);
    }

    #[test]
    fn test_match_falls_back_to_id() {
        let source = json!({"id": "chunk-9", "metadata": {}});
        let retrieved = [json!({"id": "chunk-2"}), json!({"id": "chunk-9"})];
        let outcome = match_source(&source, &retrieved);
        assert!(outcome.matched);
        assert_eq!(outcome.source_key, json!("chunk-9"));
        assert_eq!(outcome.retrieved, vec![json!("chunk-2"), json!("chunk-9")]);
    }

    #[test]
    fn test_numeric_keys_match_across_int_and_float() {
        let source = json!({"id": "x", "metadata": {"chunk_index": 3}});
        let retrieved = [json!({"metadata": {"chunk_index": 3.0}})];
        assert!(match_source(&source, &retrieved).matched);

        let by_id = json!({"id": 7.0, "metadata": {}});
        assert!(match_source(&by_id, &[json!({"id": 7})]).matched);
        assert!(!match_source(&by_id, &[json!({"id": "7"})]).matched);
    }

    #[test]
    fn test_index_takes_priority_over_id() {
        let source = json!({"id": 5, "metadata": {"chunk_index": 3}});
        let retrieved = [json!({"id": 5, "metadata": {"chunk_index": 4}})];
        assert!(!match_source(&source, &retrieved).matched);
    }

    #[test]
    fn test_metrics() {
        let m = RetrievalMetrics::from_counts(3, 4);
        assert_eq!(m.precision, 0.75);
        assert_eq!(m.recall, 0.75);
        assert!((m.f1_score - 0.75).abs() < 1e-12);
        assert_eq!(RetrievalMetrics::from_counts(0, 0).f1_score, 0.0);
    }

    #[test]
    fn test_preview() {
        let long = "x".repeat(200);
        let cut = preview(&long);
        assert_eq!(cut.chars().count(), 120);
        assert!(cut.ends_with("..."));
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn test_detail_serializes_match_key() {
        let detail = RetrievalDetail {
            source_chunk_index: json!(3),
            generated_query: "q".into(),
            retrieved_chunk_indices: vec![json!(3)],
            matched: true,
            source_preview: String::new(),
            result_preview: String::new(),
        };
        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(value["match"], true);
    }

    #[tokio::test]
    async fn test_evaluate_skips_blank_and_failed_chunks() {
        let provider = MockCompletionProvider::new();
        provider.queue_text("Who directed Alien?");
        provider.queue_error(LlmError::Timeout { timeout_secs: 1 });

        let retriever = FixedRetriever {
            samples: Ok(vec![
                json!({"id": "a", "text": "Alien was directed by Ridley Scott.", "metadata": {"chunk_index": 3}}),
                json!({"id": "b", "text": ""}),
                json!({"id": "c", "content": "Blade Runner is set in 2019."}),
            ]),
            results: vec![json!({"id": "a", "content": "Alien ...", "metadata": {"chunk_index": 3}})],
        };

        let evaluator = RetrievalEvaluator::new(&provider, &retriever, "gpt-4o-mini");
        let report = evaluator.evaluate(5, 20, &NoProgress).await;
        assert_eq!(report.metrics.total_queries, 1);
        assert_eq!(report.metrics.relevant_retrieved, 1);
        assert_eq!(report.metrics.precision, 1.0);
        assert_eq!(report.details[0].generated_query, "Who directed Alien?");
        assert_eq!(provider.requests()[0].sampling.temperature, QUERY_TEMPERATURE);
    }

    #[tokio::test]
    async fn test_evaluate_with_unreachable_samples_endpoint() {
        let provider = MockCompletionProvider::new();
        let retriever = FixedRetriever {
            samples: Err(503),
            results: vec![],
        };
        let report = RetrievalEvaluator::new(&provider, &retriever, "m")
            .evaluate(5, 20, &NoProgress)
            .await;
        assert_eq!(report, RetrievalReport::default());
        assert_eq!(provider.call_count(), 0);
    }
}
