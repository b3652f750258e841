//! Error types used throughout the reliability layer

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for qrgen
///
/// `Timeout` is never retried by the resilience layer. `CircuitOpen` means
/// the call was rejected without reaching the dependency.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum QrGenError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Circuit breaker is OPEN for {0} - service unavailable")]
    CircuitOpen(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for qrgen operations
pub type Result<T> = std::result::Result<T, QrGenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let err = QrGenError::CircuitOpen("database".into());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"type":"CircuitOpen","message":"database"}"#);

        let back: QrGenError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            QrGenError::CircuitOpen("database".into()).to_string(),
            "Circuit breaker is OPEN for database - service unavailable"
        );
        assert_eq!(QrGenError::NotFound("job 1".into()).to_string(), "Not found: job 1");
    }
}
