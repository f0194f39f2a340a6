//! Error classification traits for retry logic.
//!
//! These traits let errors self-describe their characteristics so callers
//! can drive generic retry decisions without matching on concrete types.

use std::time::Duration;

use super::common::*;

/// Classification of error types for handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient errors that may resolve on retry (network issues, timeouts)
    Transient,
    /// Permanent errors that won't resolve on retry (invalid input)
    Permanent,
    /// Resource exhaustion errors (rate limits, full channels)
    ResourceExhausted,
    /// Configuration errors (missing config, invalid settings)
    Configuration,
    /// Internal errors (bugs, unexpected state)
    Internal,
}

/// Trait for errors that can classify themselves for retry logic.
pub trait ErrorClassification {
    /// Returns the category of this error
    fn category(&self) -> ErrorCategory;

    /// Returns true if this error is transient and may succeed on retry
    fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::ResourceExhausted
        )
    }

    /// Returns true if this error is permanent and won't succeed on retry
    fn is_permanent(&self) -> bool {
        matches!(self.category(), ErrorCategory::Permanent)
    }

    /// Suggests a delay before retrying, if applicable
    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self.category() {
            ErrorCategory::Transient => Some(Duration::from_millis(100)),
            ErrorCategory::ResourceExhausted => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

impl ErrorClassification for NetworkError {
    fn category(&self) -> ErrorCategory {
        // Every transport failure here may resolve once the session recovers
        ErrorCategory::Transient
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            NetworkError::Connection(_) => Some(Duration::from_secs(1)),
            NetworkError::Timeout(_) => Some(Duration::from_millis(500)),
            _ => Some(Duration::from_millis(100)),
        }
    }
}

impl ErrorClassification for ConfigurationError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        None // Configuration errors don't resolve on retry
    }
}

impl ErrorClassification for ChannelError {
    fn category(&self) -> ErrorCategory {
        match self {
            ChannelError::Closed => ErrorCategory::Permanent,
            ChannelError::SendFailed(_) => ErrorCategory::Permanent,
            ChannelError::Full { .. } => ErrorCategory::ResourceExhausted,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            ChannelError::Full { .. } => Some(Duration::from_millis(10)),
            _ => None,
        }
    }
}

impl ErrorClassification for ValidationError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Permanent // Validation errors are input issues
    }
}

/// Retry a fallible async operation with exponential backoff.
///
/// Only transient errors are retried; the last error is returned once
/// `max_attempts` is reached or a permanent error occurs.
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut operation: F,
    max_attempts: u32,
    initial_delay: Duration,
) -> Result<T, E>
where
    E: ErrorClassification + std::fmt::Debug,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempts = 0;
    let mut delay = initial_delay;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempts += 1;

                if !err.is_transient() || attempts >= max_attempts {
                    return Err(err);
                }

                let retry_delay = err.suggested_retry_delay().unwrap_or(delay);
                tokio::time::sleep(retry_delay).await;

                // Exponential backoff with cap
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }
        }
    }
}
