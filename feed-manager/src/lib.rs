//! # Feed Manager
//!
//! Real-time market-data ingestion and subscription management for a
//! brokerage wire protocol.
//!
//! ## Features
//!
//! - **Book reconstruction**: per-symbol depth ladder and trade tape built
//!   from positional wire deltas, serialized per symbol
//! - **Subscription reconciliation**: a prioritized universe fitted into
//!   scarce vendor channels (unlimited tape, bounded depth, hard-capped
//!   tick-by-tick), with vendor rejection codes handled symbol-by-symbol
//! - **Venue fallback**: silent primary-venue channels migrate to smart
//!   routing automatically
//! - **Connection supervision**: exponential-backoff reconnect with
//!   best-effort resubscription
//!
//! ## Architecture
//!
//! The vendor session is consumed through the narrow `MarketSession` trait;
//! `FeedService` owns all session-scoped state and runs the concurrent
//! loops (event dispatch, universe refresh, fallback scan, heartbeat). The
//! reconciliation policy talks to the wire only through injected
//! `SubscriptionOps`, which keeps it testable against a recorder.

pub mod adapter;
pub mod books;
pub mod config;
pub mod connection;
pub mod fallback;
pub mod service;
pub mod subscription;
pub mod universe;

// Re-export commonly used types
pub use adapter::{ChannelId, MarketSession, MockSession, SessionError, SessionEvent};
pub use books::BookRegistry;
pub use config::Settings;
pub use connection::{ConnectionPhase, ConnectionSupervisor, ReconnectPolicy};
pub use fallback::ExchangeFallbackMonitor;
pub use service::{FeedService, ServiceError};
pub use subscription::{
    DepthEligibilityCache, SubscriptionManager, SubscriptionOps, SubscriptionRecord,
    SubscriptionStats,
};
pub use universe::{StaticUniverse, UniverseSource};
