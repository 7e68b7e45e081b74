//! Error types for the activation wizard

use thiserror::Error;

/// Main error type for the wizard
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Request rejected before any side effect took place
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Another activation or reset currently owns the device
    #[error("Device busy: {0}")]
    Busy(String),

    #[error("Process error: {0}")]
    ProcessError(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Stack error: {0}")]
    StackError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Internal(err.to_string())
    }
}
