//! Error types for live collections.

use thiserror::Error;

/// Main error type for collection operations.
///
/// Cloneable so a single in-flight refresh can hand the same outcome to
/// every caller waiting on it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LiveError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Already enabled: {0}")]
    AlreadyEnabled(String),

    #[error("Subscription error: {0}")]
    Subscription(String),
}

impl LiveError {
    /// Shorthand for a transport failure.
    pub fn transport(msg: impl Into<String>) -> Self {
        LiveError::Transport(msg.into())
    }

    /// Shorthand for a payload decode failure.
    pub fn decode(msg: impl Into<String>) -> Self {
        LiveError::Decode(msg.into())
    }
}

impl From<serde_json::Error> for LiveError {
    fn from(e: serde_json::Error) -> Self {
        LiveError::Decode(e.to_string())
    }
}

/// Result type for collection operations.
pub type Result<T> = std::result::Result<T, LiveError>;
