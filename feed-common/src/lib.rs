//! # Feed Common
//!
//! Shared domain types for the market-data feed manager:
//!
//! - **Book state**: per-instrument depth ladder, trade tape, and validity
//!   checks reconstructed from wire deltas
//! - **Errors**: common failure taxonomies with retry classification
//! - **Logging**: tracing initialization shared by binaries and tests

pub mod data;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use data::{
    BookLevel, BookSide, BookSnapshot, BookValidity, DepthOperation, DepthOutcome, DepthUpdate,
    OrderBook, QuoteField, Symbol, TradePrint, Venue, WireDecodeError,
};
pub use error::{ErrorCategory, ErrorClassification};
