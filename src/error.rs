//! Errors that cross a stage boundary.
//!
//! Inside a stage almost every failure degrades to a fallback value. Only
//! configuration problems and quota exhaustion escape as `StageError`.

use crate::gateway::ProviderError;

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("{stage}: API quota exhausted ({source}); check the API key and billing for this stage")]
    QuotaExhausted {
        stage: &'static str,
        #[source]
        source: ProviderError,
    },
    #[error("{stage}: provider error: {source}")]
    Provider {
        stage: &'static str,
        #[source]
        source: ProviderError,
    },
}

impl StageError {
    /// Classify a provider error at the boundary of `stage`.
    pub fn from_provider(stage: &'static str, err: ProviderError) -> Self {
        match err {
            ProviderError::Config(message) => StageError::Config(message),
            err if err.is_quota() => StageError::QuotaExhausted { stage, source: err },
            err => StageError::Provider { stage, source: err },
        }
    }

    /// True for errors a stage must surface instead of falling back.
    pub fn is_fatal(err: &ProviderError) -> bool {
        matches!(err, ProviderError::Config(_)) || err.is_quota()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
