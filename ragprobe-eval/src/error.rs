//! Error types for the ragprobe-eval crate.

use std::path::PathBuf;

use ragprobe_core::{LlmError, TargetError};
use thiserror::Error;

/// Top-level error type for evaluation runs.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Data directory not found: {}", .0.display())]
    DataDirNotFound(PathBuf),

    #[error("Unknown persona_id: {0}")]
    UnknownPersona(String),

    #[error("Unknown goal_id: {0}")]
    UnknownGoal(String),

    #[error("turns must be in range 1..{max}, got {turns}")]
    TurnsOutOfRange { turns: i64, max: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Target error: {0}")]
    Target(#[from] TargetError),

    #[error("Reranker error: {0}")]
    Reranker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl EvalError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn reranker(msg: impl Into<String>) -> Self {
        Self::Reranker(msg.into())
    }

    /// Whether the error rejects the caller's input rather than reporting a
    /// failure while doing the work.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EvalError::UnknownPersona(_)
                | EvalError::UnknownGoal(_)
                | EvalError::TurnsOutOfRange { .. }
                | EvalError::InvalidInput(_)
        )
    }
}

/// Result alias for evaluation operations.
pub type EvalResult<T> = Result<T, EvalError>;
