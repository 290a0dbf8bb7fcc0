use std::time::Duration;
use thiserror::Error;

/// Failures of the similarity store adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Invalid query: text is empty")]
    InvalidQuery,

    #[error("Invalid limit: must be at least 1")]
    InvalidLimit,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Failures of the completion backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model timed out after {0:?}")]
    ModelTimeout(Duration),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("No SQL statement found in completion")]
    NoSqlFound,
}

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Invalid query: question is empty")]
    InvalidQuery,

    #[error("Generation failed: {0}")]
    GenerationFailed(#[from] ModelError),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(#[from] ExtractError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl AssistantError {
    /// True when the question itself was rejected, as opposed to the model
    /// failing to produce usable SQL. The UI uses this to pick its retry hint.
    pub fn is_user_error(&self) -> bool {
        matches!(self, AssistantError::InvalidQuery)
    }
}

pub type Result<T> = std::result::Result<T, AssistantError>;
