//! Pipeline orchestration over a shared configuration.
//!
//! A [`Harness`] owns the completion provider and the target clients and runs
//! each evaluation pipeline end to end. The gateway and the CLI both drive
//! pipelines through it.

use ragprobe_core::{
    ChatTarget, CompletionProvider, HttpChatTarget, HttpRetrieverTarget, ProbeConfig,
    RetrieverTarget, create_provider,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::dataset::DatasetBuilder;
use crate::error::{EvalError, EvalResult};
use crate::progress::{Chained, ProgressSink};
use crate::retrieval::{RetrievalEvaluator, RetrievalReport};
use crate::satisfaction::{
    ConversationReport, ConversationRunner, SatisfactionParams, SatisfactionRequest, TurnJudge,
    UserSimulator,
};
use crate::single_turn::{EvaluationSummary, SingleTurnEvaluator};

/// Per-run overrides of the dataset settings.
#[derive(Debug, Clone)]
pub struct GoldenOptions {
    pub data_dir: PathBuf,
    pub pairs_per_doc: usize,
    pub write_dataset: bool,
}

impl GoldenOptions {
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self {
            data_dir: config.dataset.data_dir.clone(),
            pairs_per_doc: config.dataset.pairs_per_doc,
            write_dataset: config.dataset.write_dataset,
        }
    }
}

/// Single-turn summary extended with dataset bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoldenReport {
    #[serde(flatten)]
    pub summary: EvaluationSummary,
    pub dataset_size: usize,
    pub dataset_path: Option<String>,
    pub rid: String,
}

pub struct Harness {
    config: ProbeConfig,
    provider: Arc<dyn CompletionProvider>,
    chat: Arc<dyn ChatTarget>,
    conversation_chat: Arc<dyn ChatTarget>,
    retriever: Arc<dyn RetrieverTarget>,
}

impl Harness {
    /// Build a harness with the configured provider and HTTP targets.
    pub fn from_config(config: ProbeConfig) -> EvalResult<Self> {
        let provider = create_provider(&config.llm)?;
        let chat = Arc::new(HttpChatTarget::for_single_turn(&config.target));
        let conversation_chat = Arc::new(HttpChatTarget::for_conversation(&config.target));
        let retriever = Arc::new(HttpRetrieverTarget::new(&config.target));
        Ok(Self::new(config, provider, chat, conversation_chat, retriever))
    }

    pub fn new(
        config: ProbeConfig,
        provider: Arc<dyn CompletionProvider>,
        chat: Arc<dyn ChatTarget>,
        conversation_chat: Arc<dyn ChatTarget>,
        retriever: Arc<dyn RetrieverTarget>,
    ) -> Self {
        Self {
            config,
            provider,
            chat,
            conversation_chat,
            retriever,
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn dataset_path(&self, rid: &str) -> PathBuf {
        self.config
            .dataset
            .output_dir
            .join(format!("golden_dataset_{rid}.json"))
    }

    /// Build a golden dataset and evaluate the target against it.
    ///
    /// Progress runs through the dataset phase and then continues from the
    /// number of produced samples through the evaluation phase.
    pub async fn run_golden(
        &self,
        options: &GoldenOptions,
        rid: &str,
        progress: &dyn ProgressSink,
    ) -> EvalResult<GoldenReport> {
        if !options.data_dir.is_dir() {
            return Err(EvalError::DataDirNotFound(options.data_dir.clone()));
        }
        if options.pairs_per_doc == 0 {
            return Err(EvalError::invalid_input("pairs_per_doc must be at least 1"));
        }

        let builder = DatasetBuilder::new(
            self.provider.as_ref(),
            self.config.llm.dataset_model.clone(),
            self.config.retry.model_policy(),
            self.config.dataset.context_char_limit,
        );
        let dataset = builder
            .build(&options.data_dir, options.pairs_per_doc, progress)
            .await?;

        let dataset_path = if options.write_dataset {
            let path = self.dataset_path(rid);
            dataset.persist(&path)?;
            Some(path.display().to_string())
        } else {
            None
        };

        let produced = dataset.samples.len();
        let first_phase = [dataset.expected_total, produced, 1]
            .into_iter()
            .find(|n| *n > 0)
            .unwrap_or(1);
        let chained = Chained::new(progress, produced, first_phase + produced);

        let evaluator = SingleTurnEvaluator::new(
            self.provider.as_ref(),
            self.chat.as_ref(),
            self.config.llm.judge_model.clone(),
            self.config.retry.model_policy(),
            self.config.retry.ask_policy(),
        );
        let summary = evaluator.evaluate(&dataset.samples, Some(rid), &chained).await;
        info!(
            rid,
            dataset_size = produced,
            accuracy = summary.accuracy,
            relevance_rate = summary.relevance_rate,
            "Golden evaluation finished"
        );

        Ok(GoldenReport {
            summary,
            dataset_size: produced,
            dataset_path,
            rid: rid.to_string(),
        })
    }

    /// Evaluate the retriever. `None` or zero falls back to the configured defaults.
    pub async fn run_retrieval(
        &self,
        top_k: Option<usize>,
        limit: Option<usize>,
        progress: &dyn ProgressSink,
    ) -> RetrievalReport {
        let top_k = top_k.filter(|n| *n > 0).unwrap_or(self.config.retrieval.top_k);
        let limit = limit
            .filter(|n| *n > 0)
            .unwrap_or(self.config.retrieval.sample_chunks);
        RetrievalEvaluator::new(
            self.provider.as_ref(),
            self.retriever.as_ref(),
            self.config.llm.dataset_model.clone(),
        )
        .evaluate(top_k, limit, progress)
        .await
    }

    pub fn validate_satisfaction(&self, params: &SatisfactionParams) -> EvalResult<SatisfactionRequest> {
        params.validate(
            self.config.satisfaction.default_turns,
            self.config.satisfaction.max_turns,
        )
    }

    pub async fn run_satisfaction(
        &self,
        request: &SatisfactionRequest,
        rid: Option<&str>,
        progress: &dyn ProgressSink,
    ) -> EvalResult<ConversationReport> {
        let model_retry = self.config.retry.model_policy();
        let runner = ConversationRunner::new(
            UserSimulator::new(
                self.provider.as_ref(),
                self.config.llm.user_sim_model.clone(),
                model_retry,
            ),
            TurnJudge::new(
                self.provider.as_ref(),
                self.config.llm.judge_model.clone(),
                model_retry,
            ),
            self.conversation_chat.as_ref(),
            self.config.retry.ask_policy(),
        );
        runner.run(request, rid, progress).await
    }
}
