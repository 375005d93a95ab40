//! Configuration system for ragprobe.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> flat
//! deployment environment variables -> `RAGPROBE_` prefixed environment.
//! Configuration is loaded from `~/.config/ragprobe/ragprobe.toml` and/or
//! `ragprobe.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Top-level configuration for the evaluation harness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub satisfaction: SatisfactionConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl ProbeConfig {
    /// Reject settings that would make a pipeline misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.model_attempts == 0 || self.retry.ask_attempts == 0 {
            return Err(ConfigError::Invalid {
                message: "retry attempt counts must be at least 1".into(),
            });
        }
        let bases = [self.retry.model_backoff_base, self.retry.ask_backoff_base];
        if bases.iter().any(|b| !b.is_finite() || *b <= 0.0) {
            return Err(ConfigError::Invalid {
                message: "backoff bases must be positive and finite".into(),
            });
        }
        if self.dataset.pairs_per_doc == 0 {
            return Err(ConfigError::Invalid {
                message: "dataset.pairs_per_doc must be at least 1".into(),
            });
        }
        if self.dataset.context_char_limit < 2 {
            return Err(ConfigError::Invalid {
                message: "dataset.context_char_limit must be at least 2".into(),
            });
        }
        if self.satisfaction.max_turns == 0
            || self.satisfaction.default_turns == 0
            || self.satisfaction.default_turns > self.satisfaction.max_turns
        {
            return Err(ConfigError::Invalid {
                message: format!(
                    "satisfaction turns must satisfy 1 <= default ({}) <= max ({})",
                    self.satisfaction.default_turns, self.satisfaction.max_turns
                ),
            });
        }
        if self.server.workers == 0 {
            return Err(ConfigError::Invalid {
                message: "server.workers must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Model provider configuration. One OpenAI-compatible endpoint serves all three roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Model used to synthesize golden pairs and retrieval queries.
    pub dataset_model: String,
    /// Model used for correctness, relevance, and per-turn judging.
    pub judge_model: String,
    /// Model used to simulate the user in persona conversations.
    pub user_sim_model: String,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            dataset_model: "gpt-4o-mini".to_string(),
            judge_model: "gpt-4o-mini".to_string(),
            user_sim_model: "gpt-4o-mini".to_string(),
            timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Endpoints of the application under evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Chat endpoint accepting `{messages: [{role, parts}]}`.
    pub chat_url: String,
    /// Timeout for single-turn chat calls (seconds).
    pub chat_timeout_secs: u64,
    /// Samples endpoint accepting `{limit}`.
    pub samples_url: String,
    /// Retriever endpoint accepting `{question, topK}`.
    pub retriever_url: String,
    /// Timeout for samples and retriever calls (seconds).
    pub retrieval_timeout_secs: u64,
    /// Timeout for chat calls made during persona conversations (seconds).
    pub conversation_timeout_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            chat_url: "http://app:3000/api/chat".to_string(),
            chat_timeout_secs: 180,
            samples_url: "http://app:3000/api/rag_level/samples".to_string(),
            retriever_url: "http://app:3000/api/rag_level/retriever".to_string(),
            retrieval_timeout_secs: 60,
            conversation_timeout_secs: 60,
        }
    }
}

/// Golden dataset generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Directory holding the source documents.
    pub data_dir: PathBuf,
    /// Question/answer pairs requested per document.
    pub pairs_per_doc: usize,
    /// Maximum characters of a document sent to the model.
    pub context_char_limit: usize,
    /// Directory the generated `golden_dataset_{rid}.json` files land in.
    pub output_dir: PathBuf,
    /// Whether job runs persist the generated dataset.
    pub write_dataset: bool,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/app/movie_data"),
            pairs_per_doc: 5,
            context_char_limit: 6000,
            output_dir: PathBuf::from("."),
            write_dataset: true,
        }
    }
}

/// Retry settings for the two classes of external call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per model completion call.
    pub model_attempts: u32,
    /// Backoff base for model calls.
    pub model_backoff_base: f64,
    /// Attempts per target-application chat call.
    pub ask_attempts: u32,
    /// Backoff base for target-application calls.
    pub ask_backoff_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            model_attempts: 3,
            model_backoff_base: 0.8,
            ask_attempts: 2,
            ask_backoff_base: 0.7,
        }
    }
}

impl RetryConfig {
    pub fn model_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.model_attempts, self.model_backoff_base)
    }

    pub fn ask_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.ask_attempts, self.ask_backoff_base)
    }
}

/// Bounded attempts with `base^attempt + 0.05 * attempt` seconds between them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn once() -> Self {
        Self::new(1, 1.0)
    }
}

/// Retriever-level evaluation defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of sample chunks fetched per run.
    pub sample_chunks: usize,
    /// Default number of retrieved results per query.
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            sample_chunks: 20,
            top_k: 5,
        }
    }
}

/// Persona conversation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatisfactionConfig {
    pub default_turns: usize,
    pub max_turns: usize,
}

impl Default for SatisfactionConfig {
    fn default() -> Self {
        Self {
            default_turns: 4,
            max_turns: 12,
        }
    }
}

/// Cross-encoder reranker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// Cross-encoder model identifier.
    pub model: String,
    /// Device hint forwarded to the inference server (e.g. "cpu", "cuda").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Base URL of the inference server exposing `/rerank`.
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            model: "cross-encoder/ms-marco-MiniLM-L-6-v2".to_string(),
            device: None,
            url: "http://reranker:8080".to_string(),
            timeout_secs: 30,
        }
    }
}

/// HTTP gateway and job worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Evaluation jobs allowed to run at the same time.
    pub workers: usize,
    /// Finished jobs kept around for polling before the oldest are evicted.
    pub max_finished_jobs: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            workers: 2,
            max_finished_jobs: 256,
        }
    }
}

/// Secondary names, merged first so the primary names below override them.
const ENV_ALIASES: &[(&str, &str)] = &[
    ("OPENAI_DATASET_MODEL", "llm.dataset_model"),
    ("OPENAI_JUDGE_MODEL", "llm.judge_model"),
    ("OPENAI_USER_SIM_MODEL", "llm.user_sim_model"),
];

/// Flat environment names used by existing deployments.
const ENV_NAMES: &[(&str, &str)] = &[
    ("OPENAI_BASE_URL", "llm.base_url"),
    ("DATASET_MODEL", "llm.dataset_model"),
    ("JUDGE_MODEL", "llm.judge_model"),
    ("USER_SIM_MODEL", "llm.user_sim_model"),
    ("APP_CHAT_URL", "target.chat_url"),
    ("APP_CHAT_TIMEOUT", "target.chat_timeout_secs"),
    ("RAG_LEVEL_SAMPLES_ENDPOINT", "target.samples_url"),
    ("RAG_LEVEL_RETRIEVER_ENDPOINT", "target.retriever_url"),
    ("RAG_LEVEL_HTTP_TIMEOUT", "target.retrieval_timeout_secs"),
    ("USER_EVAL_HTTP_TIMEOUT", "target.conversation_timeout_secs"),
    ("MOVIE_DATA_DIR", "dataset.data_dir"),
    ("GOLDEN_PAIRS_PER_DOC", "dataset.pairs_per_doc"),
    ("GOLDEN_DATASET_DIR", "dataset.output_dir"),
    ("OPENAI_RETRIES", "retry.model_attempts"),
    ("OPENAI_BACKOFF_BASE", "retry.model_backoff_base"),
    ("ASK_RETRIES", "retry.ask_attempts"),
    ("RAG_LEVEL_SAMPLE_CHUNKS", "retrieval.sample_chunks"),
    ("RAG_LEVEL_TOP_K", "retrieval.top_k"),
    ("RERANKER_MODEL", "reranker.model"),
    ("RERANKER_DEVICE", "reranker.device"),
    ("RERANKER_URL", "reranker.url"),
    ("EVAL_WORKERS", "server.workers"),
];

fn mapped_env(table: &'static [(&'static str, &'static str)]) -> Env {
    Env::raw().filter_map(move |key| {
        table
            .iter()
            .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
            .map(|(_, path)| (*path).into())
    })
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. `RAGPROBE_` environment variables (`RAGPROBE_TARGET__CHAT_URL`, ...)
/// 2. Flat deployment variables (`APP_CHAT_URL`, `OPENAI_RETRIES`, ...)
/// 3. Explicit config file, or workspace-local `ragprobe.toml`
/// 4. User config (`~/.config/ragprobe/ragprobe.toml`)
/// 5. Built-in defaults
///
/// An explicit path that does not exist is an error; the implicit locations
/// are skipped when absent.
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<ProbeConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(ProbeConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "ragprobe", "ragprobe") {
        let user_config = dirs.config_dir().join("ragprobe.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            if let Some(ws) = workspace {
                let ws_config = ws.join("ragprobe.toml");
                if ws_config.exists() {
                    figment = figment.merge(Toml::file(&ws_config));
                }
            }
        }
    }

    figment = figment
        .merge(mapped_env(ENV_ALIASES))
        .merge(mapped_env(ENV_NAMES))
        .merge(Env::prefixed("RAGPROBE_").split("__"));

    figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}
