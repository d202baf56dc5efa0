//! Unified error type for taskflow.

use thiserror::Error;

/// Result type alias using TaskFlowError.
pub type Result<T> = std::result::Result<T, TaskFlowError>;

#[derive(Error, Debug)]
pub enum TaskFlowError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Executor error: {0}")]
    ExecutorError(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TaskFlowError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// HTTP status code this error maps to at the gateway boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::NotFound(_) => 404,
            Self::InvalidTransition(_) => 409,
            _ => 500,
        }
    }
}
