//! Depth eligibility cache.
//!
//! Some instruments never support depth on some venues; the vendor rejects
//! every request with the same code. This cache remembers those rejections
//! so reconciliation stops sending doomed requests, and lets them through
//! again once a cool-off window has passed.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use feed_common::data::Symbol;

/// Depth support state for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthState {
    /// Never attempted, or cool-off expired
    Unknown,
    /// Depth confirmed working
    Eligible,
    /// Vendor rejected depth; suppressed until cool-off expires
    Ineligible,
}

#[derive(Debug, Clone)]
struct Entry {
    state: DepthState,
    reason: Option<String>,
    marked_at: DateTime<Utc>,
}

/// Per-symbol depth eligibility with cool-off expiry.
pub struct DepthEligibilityCache {
    entries: RwLock<HashMap<Symbol, Entry>>,
    cooloff: Duration,
}

impl DepthEligibilityCache {
    pub fn new(cooloff: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            cooloff,
        }
    }

    /// Whether a depth request for `symbol` should be sent now.
    ///
    /// Returns `false` while a prior ineligible marking is inside its
    /// cool-off window; an expired marking is cleared back to `Unknown`.
    pub fn can_request_depth(
        &self,
        security_class: &str,
        symbol: &Symbol,
        now: DateTime<Utc>,
    ) -> (bool, DepthState) {
        let mut entries = self.entries.write();
        match entries.get(symbol) {
            Some(entry) if entry.state == DepthState::Ineligible => {
                if now - entry.marked_at >= self.cooloff {
                    entries.remove(symbol);
                    info!(
                        "Depth cool-off expired for {} ({}), allowing retry",
                        symbol, security_class
                    );
                    (true, DepthState::Unknown)
                } else {
                    (false, DepthState::Ineligible)
                }
            }
            Some(entry) => (true, entry.state),
            None => (true, DepthState::Unknown),
        }
    }

    /// Record that depth is working for `symbol`. Idempotent; logs only on
    /// the state transition. Safe to call from the dispatch hot path: the
    /// already-eligible case takes only the read lock.
    pub fn mark_eligible(&self, symbol: &Symbol) {
        {
            let entries = self.entries.read();
            if matches!(
                entries.get(symbol),
                Some(Entry { state: DepthState::Eligible, .. })
            ) {
                return;
            }
        }
        let mut entries = self.entries.write();
        entries.insert(
            symbol.clone(),
            Entry {
                state: DepthState::Eligible,
                reason: None,
                marked_at: Utc::now(),
            },
        );
        debug!("Depth marked eligible for {}", symbol);
    }

    /// Record a vendor depth rejection for `symbol`. Idempotent; logs only
    /// on the state transition, never per rejected attempt.
    pub fn mark_ineligible(&self, symbol: &Symbol, reason: &str, now: DateTime<Utc>) {
        let mut entries = self.entries.write();
        let already = matches!(
            entries.get(symbol),
            Some(Entry { state: DepthState::Ineligible, .. })
        );
        if already {
            return;
        }
        entries.insert(
            symbol.clone(),
            Entry {
                state: DepthState::Ineligible,
                reason: Some(reason.to_string()),
                marked_at: now,
            },
        );
        warn!(
            "Depth marked ineligible for {} until cool-off: {}",
            symbol, reason
        );
    }

    /// Current state for a symbol
    pub fn state(&self, symbol: &Symbol) -> DepthState {
        self.entries
            .read()
            .get(symbol)
            .map(|e| e.state)
            .unwrap_or(DepthState::Unknown)
    }

    /// Reason attached to an ineligible marking
    pub fn reason(&self, symbol: &Symbol) -> Option<String> {
        self.entries
            .read()
            .get(symbol)
            .and_then(|e| e.reason.clone())
    }
}
