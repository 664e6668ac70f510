//! Error types and result handling for the patient safety prediction platform

use thiserror::Error;

/// Result type alias used across every component crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type shared by every pipeline component
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Normalization error: {0}")]
    Normalization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Audit error: {0}")]
    Audit(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Whether the operation that produced this error is safe to retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Gateway(_))
    }

    /// Error category, used for metrics and audit records
    pub fn category(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Graph(_) => "graph",
            Error::Gateway(_) => "gateway",
            Error::Normalization(_) => "normalization",
            Error::Validation(_) => "validation",
            Error::Audit(_) => "audit",
            Error::InvalidInput(_) => "invalid_input",
            Error::Serialization(_) => "serialization",
            Error::Internal(_) => "internal",
        }
    }
}
