//! Error types for Trifecta
//!
//! This module defines the main error type used throughout Trifecta and the
//! mapping of Kafka wire-level status codes to readable errors.

use thiserror::Error;

mod hints;
mod kafka_error_code;

pub use hints::ErrorHint;
pub use kafka_error_code::{KafkaCode, KafkaErrorCode};

/// Result type alias for Trifecta operations
pub type Result<T> = std::result::Result<T, TrifectaError>;

/// Main error type for Trifecta
#[derive(Error, Debug)]
pub enum TrifectaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Protocol error: {operation}: {detail}")]
    Protocol { operation: String, detail: String },

    #[error("Kafka error: {0}")]
    KafkaCode(KafkaCode),

    #[error("No leader available for {topic}:{partition}")]
    LeaderUnavailable { topic: String, partition: i32 },

    #[error("ZooKeeper key not found: {0}")]
    ZkNotFound(String),

    #[error("Failed to delete ZooKeeper key {path}: {reason}")]
    ZkDeleteFailed { path: String, reason: String },

    #[error("ZooKeeper connection lost")]
    ZkConnectionLost,

    #[error("ZooKeeper error: {0}")]
    Zk(String),

    #[error("Unrecognized value type '{0}'")]
    InvalidType(String),

    #[error("'{text}' is not a valid {expected}")]
    InvalidLiteral { text: String, expected: String },

    #[error("{command}: {reason}")]
    InvalidArgs { command: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrifectaError {
    /// Create a protocol error with the failing operation and a detail
    pub fn protocol(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Protocol {
            operation: operation.into(),
            detail: detail.into(),
        }
    }

    /// Create an error from a wire-level Kafka status code
    pub fn kafka_code(code: i16) -> Self {
        Self::KafkaCode(KafkaCode(code))
    }

    /// Create an invalid-arguments error attributed to a command
    pub fn invalid_args(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgs {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid-literal error for the value codec
    pub fn invalid_literal(text: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::InvalidLiteral {
            text: text.into(),
            expected: expected.into(),
        }
    }

    /// Create an internal error
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    /// True when this error stems from the transport layer (socket, timeout)
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kafka_code_error_display() {
        let err = TrifectaError::kafka_code(6);
        assert_eq!(
            err.to_string(),
            "Kafka error: Not Leader For Partition (code 6)"
        );
    }

    #[test]
    fn transport_classification() {
        let io = TrifectaError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(io.is_transport());
        assert!(TrifectaError::Timeout(63356).is_transport());
        assert!(!TrifectaError::ZkConnectionLost.is_transport());
    }
}
