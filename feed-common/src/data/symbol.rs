//! Instrument and venue identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized instrument identifier.
///
/// All per-instrument state (books, subscription records, channel maps) is
/// keyed by `Symbol`. Construction normalizes to trimmed uppercase so that
/// `"aapl "` and `"AAPL"` address the same book.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a normalized symbol
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Execution venue a subscription is routed to.
///
/// The default ("smart-routed") venue lets the vendor pick; any other value
/// targets a specific exchange and is considered *primary* routing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Venue(String);

/// Vendor identifier for smart (default) routing
pub const SMART_VENUE: &str = "SMART";

impl Venue {
    /// Create a venue from a raw exchange identifier
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_uppercase())
    }

    /// The default smart-routed venue
    pub fn smart() -> Self {
        Self(SMART_VENUE.to_string())
    }

    /// True when this venue is the default smart routing
    pub fn is_smart(&self) -> bool {
        self.0 == SMART_VENUE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Venue {
    fn default() -> Self {
        Self::smart()
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Venue {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}
