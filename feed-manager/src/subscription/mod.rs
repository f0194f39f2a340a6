//! Subscription reconciliation and vendor-capacity management.
//!
//! This module decides *what* should be subscribed; the wire-level *how* is
//! injected through the `SubscriptionOps` trait so the policy is testable
//! against a recorder instead of a live session.

mod eligibility;
mod manager;
mod ops;

pub use eligibility::{DepthEligibilityCache, DepthState};
pub use manager::{ReconcileReport, SubscriptionManager, SubscriptionRecord, SubscriptionStats};
pub use ops::SubscriptionOps;
