use std::{fmt, path::PathBuf, time::Duration};

use thiserror::Error;
use uuid::Uuid;

use crate::types::Stage;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Missing API key: {env_var} environment variable is not set")]
    MissingApiKey { env_var: String },

    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid API response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Failed to read {path}: {source}")]
    ReadAsset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProviderError {
    /// True when the provider asked us to slow down (HTTP 429, quota or rate-limit text).
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ProviderError::Api { status: 429, .. } => true,
            ProviderError::Http(e) if e.status().map(|s| s.as_u16()) == Some(429) => true,
            other => is_rate_limit_message(&other.to_string()),
        }
    }
}

pub fn is_rate_limit_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("quota") || message.contains("rate limit") || message.contains("429")
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("No usable model: every candidate failed ({})", tried.join(", "))]
    NoUsableModel { tried: Vec<String> },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Analysis {0} not found")]
    NotFound(Uuid),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure taxonomy of a workflow run.
///
/// `Enrichment` and `Aggregation` never leave the engine; they are logged and
/// replaced with empty output at the stage boundary.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Could not acquire video: {0}")]
    Acquisition(String),

    #[error("Video understanding failed: {0}")]
    Understanding(String),

    #[error("{stage} failed: {reason}")]
    Enrichment { stage: Stage, reason: String },

    #[error("Knowledge aggregation failed: {0}")]
    Aggregation(String),

    #[error(transparent)]
    ProviderExhausted(#[from] ModelError),

    #[error("Analysis exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

impl WorkflowError {
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            WorkflowError::Enrichment { .. } | WorkflowError::Aggregation(_)
        )
    }
}

/// What a caller gets back when an analysis halts.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct WorkflowFailure {
    pub stage: Stage,
    pub message: String,
}

impl fmt::Display for WorkflowFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at {})", self.message, self.stage)
    }
}

impl std::error::Error for WorkflowFailure {}

#[derive(Error, Debug)]
pub enum TranslationError {
    #[error("Target language must not be empty")]
    EmptyLanguage,

    #[error("Analysis {0} not found")]
    NotFound(Uuid),

    #[error("Analysis {0} has no completed transcript to translate")]
    NotReady(Uuid),

    #[error("Translation request failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Translation response could not be parsed: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error("Invalid analysis request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
