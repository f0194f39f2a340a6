//! Market-data domain types
//!
//! This module provides the per-instrument state reconstructed from the
//! vendor wire:
//! - `Symbol` / `Venue`: normalized instrument and routing identifiers
//! - `DepthUpdate`, `TradePrint`, `QuoteField`: decoded wire payloads
//! - `OrderBook`: positional depth ladder, trade tape, and validity checks

mod book;
mod symbol;

pub use book::*;
pub use symbol::*;
