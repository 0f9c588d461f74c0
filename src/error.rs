//! Crate-level error type

use thiserror::Error;

use crate::completion::CompletionError;
use crate::config::ConfigError;
use crate::context::{HistoryError, TokenizerError};
use crate::dispatch::DispatchError;

/// Errors surfaced while wiring up or driving the dispatch service
#[derive(Debug, Error)]
pub enum DispatchServiceError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Prompt seed error: {0}")]
    PromptSeed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DispatchServiceError>;
