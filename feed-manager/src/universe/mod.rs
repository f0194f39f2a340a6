//! Universe source seam.
//!
//! The ranked symbol list comes from an external scanner; the core only
//! consumes it. `StaticUniverse` serves configured symbols for offline runs
//! and tests, and can be repointed at runtime.

use async_trait::async_trait;
use parking_lot::RwLock;

use feed_common::data::Symbol;

/// Supplier of the prioritized symbol universe, most-preferred first.
#[async_trait]
pub trait UniverseSource: Send + Sync {
    /// Current universe snapshot; ordering is the priority
    async fn fetch(&self) -> Vec<Symbol>;
}

/// Fixed universe seeded from configuration.
pub struct StaticUniverse {
    symbols: RwLock<Vec<Symbol>>,
}

impl StaticUniverse {
    pub fn new(symbols: Vec<Symbol>) -> Self {
        Self {
            symbols: RwLock::new(symbols),
        }
    }

    /// Build from raw configured strings, dropping empties
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let symbols = names
            .iter()
            .map(Symbol::new)
            .filter(|s| !s.is_empty())
            .collect();
        Self::new(symbols)
    }

    /// Replace the universe (picked up on the next reconciliation pass)
    pub fn set(&self, symbols: Vec<Symbol>) {
        *self.symbols.write() = symbols;
    }
}

#[async_trait]
impl UniverseSource for StaticUniverse {
    async fn fetch(&self) -> Vec<Symbol> {
        self.symbols.read().clone()
    }
}
