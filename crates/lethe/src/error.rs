//! Error types for Lethe

use thiserror::Error;

/// Main error type for Lethe operations
#[derive(Error, Debug)]
pub enum LetheError {
    /// Malformed or out-of-range inputs (scores, timestamps, records)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transient storage failures (retryable)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Structural storage failures: the backend cannot satisfy the atomicity
    /// contract. Fatal; never downgraded to non-atomic behavior.
    #[error("Atomicity unsupported: {0}")]
    AtomicityUnsupported(String),

    /// External language-capability failures (extraction, summarization)
    #[error("Capability error: {0}")]
    Capability(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Event bus errors
    #[error("Bus error: {0}")]
    Bus(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General errors
    #[error("{0}")]
    General(String),
}

impl From<serde_json::Error> for LetheError {
    fn from(e: serde_json::Error) -> Self {
        LetheError::Serialization(e.to_string())
    }
}

/// Result type alias for Lethe operations
pub type Result<T> = std::result::Result<T, LetheError>;
