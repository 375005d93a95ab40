//! Cross-encoder reranking of retrieval candidates.
//!
//! The encoder handle is created on first use and shared for the life of the
//! service. Creation happens under an async lock with a second check inside,
//! so concurrent first requests initialize it exactly once.

use async_trait::async_trait;
use ragprobe_core::config::RerankerConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{EvalError, EvalResult};

/// Scores `(query, text)` pairs. Higher is more relevant.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// One score per text, in input order.
    async fn score(&self, query: &str, texts: &[String]) -> EvalResult<Vec<f64>>;

    fn model(&self) -> &str;
}

/// Cross-encoder served by a text-embeddings-inference compatible `/rerank` endpoint.
pub struct HttpCrossEncoder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ScoredIndex {
    index: usize,
    score: f64,
}

impl HttpCrossEncoder {
    pub fn new(config: &RerankerConfig) -> EvalResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EvalError::reranker(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/rerank", config.url.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn score(&self, query: &str, texts: &[String]) -> EvalResult<Vec<f64>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({"query": query, "texts": texts, "raw_scores": true}))
            .send()
            .await
            .map_err(|e| EvalError::reranker(format!("request to {} failed: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EvalError::reranker(format!(
                "{} returned HTTP {}: {body}",
                self.endpoint,
                status.as_u16()
            )));
        }

        let scored: Vec<ScoredIndex> = response
            .json()
            .await
            .map_err(|e| EvalError::reranker(format!("unexpected response shape: {e}")))?;

        let mut scores = vec![None; texts.len()];
        for item in scored {
            if let Some(slot) = scores.get_mut(item.index) {
                *slot = Some(item.score);
            }
        }
        scores
            .into_iter()
            .enumerate()
            .map(|(i, s)| s.ok_or_else(|| EvalError::reranker(format!("no score for text {i}"))))
            .collect()
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Candidate identifiers arrive either as numbers or strings and are echoed back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CandidateId {
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub content: String,
    #[serde(default)]
    pub distance: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RerankRequest {
    pub query: String,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    /// Absent or zero returns every candidate.
    #[serde(default)]
    pub top_n: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub id: CandidateId,
    pub content: String,
    pub distance: Option<f64>,
    pub rerank_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RerankResponse {
    pub results: Vec<RankedCandidate>,
}

type EncoderFactory = Box<dyn Fn(&RerankerConfig) -> EvalResult<Arc<dyn CrossEncoder>> + Send + Sync>;

pub struct RerankService {
    config: RerankerConfig,
    factory: EncoderFactory,
    encoder: OnceLock<Arc<dyn CrossEncoder>>,
    init: Mutex<()>,
}

impl RerankService {
    /// A service backed by [`HttpCrossEncoder`].
    pub fn new(config: RerankerConfig) -> Self {
        Self::with_factory(config, |config| {
            Ok(Arc::new(HttpCrossEncoder::new(config)?) as Arc<dyn CrossEncoder>)
        })
    }

    pub fn with_factory<F>(config: RerankerConfig, factory: F) -> Self
    where
        F: Fn(&RerankerConfig) -> EvalResult<Arc<dyn CrossEncoder>> + Send + Sync + 'static,
    {
        Self {
            config,
            factory: Box::new(factory),
            encoder: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.encoder.get().is_some()
    }

    async fn encoder(&self) -> EvalResult<Arc<dyn CrossEncoder>> {
        if let Some(encoder) = self.encoder.get() {
            return Ok(encoder.clone());
        }
        let _guard = self.init.lock().await;
        if let Some(encoder) = self.encoder.get() {
            return Ok(encoder.clone());
        }
        info!(
            model = %self.config.model,
            device = self.config.device.as_deref().unwrap_or("default"),
            "Initializing cross-encoder"
        );
        let encoder = (self.factory)(&self.config)?;
        let _ = self.encoder.set(encoder.clone());
        Ok(encoder)
    }

    /// Score every candidate against the query and return them best first.
    pub async fn rerank(&self, request: RerankRequest) -> EvalResult<RerankResponse> {
        if request.candidates.is_empty() {
            return Ok(RerankResponse::default());
        }

        let encoder = self.encoder().await?;
        let texts: Vec<String> = request.candidates.iter().map(|c| c.content.clone()).collect();
        let scores = encoder.score(&request.query, &texts).await?;
        if scores.len() != texts.len() {
            return Err(EvalError::reranker(format!(
                "expected {} scores, got {}",
                texts.len(),
                scores.len()
            )));
        }

        let mut results: Vec<RankedCandidate> = request
            .candidates
            .into_iter()
            .zip(scores)
            .map(|(candidate, rerank_score)| RankedCandidate {
                id: candidate.id,
                content: candidate.content,
                distance: candidate.distance,
                rerank_score,
            })
            .collect();
        results.sort_by(|a, b| b.rerank_score.total_cmp(&a.rerank_score));

        if let Some(n) = request.top_n.filter(|n| *n > 0) {
            results.truncate(n);
        }
        debug!(model = encoder.model(), returned = results.len(), "Reranked candidates");
        Ok(RerankResponse { results })
    }
}
