//! Common error types shared across crates.

use std::time::Duration;
use thiserror::Error;

/// Network and transport errors.
///
/// Use this for vendor-session connections and any socket-level failure.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum NetworkError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Operation timed out
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// Send operation failed
    #[error("Send failed: {0}")]
    Send(String),

    /// Receive operation failed
    #[error("Receive failed: {0}")]
    Receive(String),

    /// Connection was closed by the peer
    #[error("Connection closed: {0}")]
    Closed(String),
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// Required field is missing
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Field has invalid value
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// Configuration file could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Environment variable not set
    #[error("Environment variable not set: {0}")]
    EnvVarMissing(String),
}

/// Channel/queue communication errors.
///
/// Use this for mpsc and broadcast channel operations between tasks.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ChannelError {
    /// Channel is closed
    #[error("Channel closed")]
    Closed,

    /// Send failed (receiver dropped)
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Channel is full (backpressure)
    #[error("Channel full (capacity: {capacity})")]
    Full { capacity: usize },
}

/// Validation errors for incoming identifiers and payloads.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ValidationError {
    /// Required field is empty or missing
    #[error("{field} is required but was empty")]
    Required { field: &'static str },

    /// Value is out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: String,
        min: String,
        max: String,
    },

    /// Field has invalid format
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: &'static str, reason: String },
}

impl ValidationError {
    /// Create a Required validation error
    pub fn required(field: &'static str) -> Self {
        ValidationError::Required { field }
    }

    /// Create an OutOfRange validation error
    pub fn out_of_range(
        field: &'static str,
        value: impl ToString,
        min: impl ToString,
        max: impl ToString,
    ) -> Self {
        ValidationError::OutOfRange {
            field,
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }

    /// Create an InvalidFormat validation error
    pub fn invalid_format(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_display() {
        let err = NetworkError::Connection("refused".to_string());
        assert!(err.to_string().contains("Connection failed"));

        let err = NetworkError::Timeout(Duration::from_secs(10));
        assert!(err.to_string().contains("Timeout"));
    }

    #[test]
    fn test_validation_error_constructors() {
        let err = ValidationError::required("symbol");
        assert!(err.to_string().contains("symbol is required"));

        let err = ValidationError::out_of_range("depth_rows", 25, 1, 10);
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_configuration_error_display() {
        let err = ConfigurationError::InvalidValue {
            field: "port".to_string(),
            reason: "must be between 1 and 65535".to_string(),
        };
        assert!(err.to_string().contains("Invalid value for 'port'"));
    }
}
