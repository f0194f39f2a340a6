//! Common error types and classification.
//!
//! This module provides:
//! - Shared failure taxonomies (`NetworkError`, `ConfigurationError`,
//!   `ChannelError`, `ValidationError`) that crate-specific errors can wrap
//!   with `#[from]`
//! - `ErrorClassification` so callers can drive generic retry logic
//! - `retry_with_backoff` for bounded retries of transient failures

mod common;
mod traits;

pub use common::*;
pub use traits::*;
