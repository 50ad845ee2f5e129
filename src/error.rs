//! Centralized error handling for the pipeline.
//!
//! The variants mirror how a failure should be treated by the worker
//! that hits it: ignorable payloads are dropped with a warning,
//! processing errors are fatal for the current message, transient
//! errors may be retried, and data errors are logged and dropped
//! rather than corrupting stored state.

use thiserror::Error;

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed queue payload missing required fields; drop with a warning.
    #[error("ignorable payload: {0}")]
    Ignorable(String),

    /// Semantically invalid claim (no orcidid, wrong shape); fatal for the message.
    #[error("processing error: {0}")]
    Processing(String),

    /// External service returned non-200 or the request failed outright.
    #[error("transient error talking to {endpoint}: {message}")]
    Transient { endpoint: String, message: String },

    /// Invariant violation detected at write time; drop instead of corrupting state.
    #[error("data error: {0}")]
    Data(String),

    /// Database operation failures.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP transport failures.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization failures.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Timestamp parsing failures.
    #[error("invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    /// Configuration loading failures.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Non-200 response from an external endpoint.
    pub fn transient(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Transient {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Returns true when the caller may retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient { .. } | Error::Http(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::transient("/updates", "503").is_retryable());
        assert!(!Error::Ignorable("garbage".into()).is_retryable());
        assert!(!Error::Processing("no orcidid".into()).is_retryable());
        assert!(!Error::Data("bad index".into()).is_retryable());
    }
}
