//! # ragprobe Core
//!
//! Core plumbing for the ragprobe evaluation harness.
//! Provides configuration, the model completion interface and its
//! OpenAI-compatible provider, the bounded retry wrapper, HTTP clients for the
//! application under evaluation, and tolerant parsing of model output.

pub mod brain;
pub mod config;
pub mod error;
pub mod parse;
pub mod providers;
pub mod target;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{CompletionProvider, MockCompletionProvider};
pub use config::{ProbeConfig, RetryPolicy, load_config};
pub use error::{ConfigError, LlmError, TargetError};
pub use parse::{Decision, JudgeKind, QaPair, Verdict, parse_pairs, parse_verdict};
pub use providers::{create_provider, with_retry};
pub use target::{ChatTarget, HttpChatTarget, HttpRetrieverTarget, MockChatTarget, RetrieverTarget};
pub use types::{ChatMessage, Completion, CompletionRequest, Role, Sampling};
