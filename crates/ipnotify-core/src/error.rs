//! Error types for ipnotify
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for ipnotify operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for ipnotify
#[derive(Error, Debug)]
pub enum Error {
    /// History file could not be read or written (permissions, OS failure)
    #[error("History file error: {0}")]
    File(String),

    /// History file content is structurally invalid
    #[error("History validation error: {0}")]
    Validation(String),

    /// IP resolution failed
    #[error("Network error: {0}")]
    Network(String),

    /// Notification delivery failed after the transport's own retries
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a history file error
    pub fn file(msg: impl Into<String>) -> Self {
        Self::File(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this error means the history content was unusable
    /// (as opposed to the file being inaccessible)
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
