//! # ragprobe Eval
//!
//! Evaluation pipelines for conversational RAG applications: golden dataset
//! construction, single-turn grading, retriever-level matching and
//! persona-driven conversations, plus the in-process job queue, the
//! cross-encoder reranking service and the HTTP gateway that exposes them.

pub mod dataset;
pub mod error;
pub mod gateway;
pub mod harness;
pub mod jobs;
pub mod progress;
pub mod prompts;
pub mod rerank;
pub mod retrieval;
pub mod satisfaction;
pub mod single_turn;

pub use dataset::{DatasetBuilder, GoldenDataset, Sample};
pub use error::{EvalError, EvalResult};
pub use gateway::{AppState, SharedState, gateway_router, run_gateway};
pub use harness::{GoldenOptions, GoldenReport, Harness};
pub use jobs::{JobKind, JobRecord, JobState, LocalJobQueue};
pub use progress::{NoProgress, Phase, Progress, ProgressSink};
pub use rerank::{CrossEncoder, HttpCrossEncoder, RerankRequest, RerankResponse, RerankService};
pub use retrieval::{RetrievalEvaluator, RetrievalMetrics, RetrievalReport};
pub use satisfaction::{ConversationReport, ConversationRunner, SatisfactionParams};
pub use single_turn::{EvaluationSummary, SingleTurnEvaluator};
