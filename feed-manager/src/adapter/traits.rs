//! Session trait definitions
//!
//! `MarketSession` is the seam between the core and the vendor wire
//! protocol. Implementations own the socket, request framing, and the
//! vendor's full callback surface; the core sees only these primitives and
//! the `SessionEvent` queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use feed_common::data::{Symbol, Venue};
use feed_common::error::{ErrorCategory, ErrorClassification};

/// Vendor-issued subscription channel identifier
pub type ChannelId = i64;

/// Session error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SessionError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Session not connected")]
    NotConnected,

    #[error("Request send failed: {0}")]
    Send(String),

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Session event channel closed")]
    ChannelClosed,
}

impl ErrorClassification for SessionError {
    fn category(&self) -> ErrorCategory {
        match self {
            SessionError::Connect(_) => ErrorCategory::Transient,
            SessionError::NotConnected => ErrorCategory::Transient,
            SessionError::Send(_) => ErrorCategory::Transient,
            SessionError::Timeout(_) => ErrorCategory::Transient,
            SessionError::ChannelClosed => ErrorCategory::Permanent,
        }
    }

    fn suggested_retry_delay(&self) -> Option<std::time::Duration> {
        match self {
            SessionError::Connect(_) => Some(std::time::Duration::from_secs(1)),
            SessionError::NotConnected => Some(std::time::Duration::from_secs(1)),
            SessionError::Send(_) => Some(std::time::Duration::from_millis(500)),
            SessionError::Timeout(_) => Some(std::time::Duration::from_millis(500)),
            SessionError::ChannelClosed => None,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Inbound event from the vendor session.
///
/// Enum fields carrying wire-level encodings (`side`, `operation`, `field`)
/// are decoded by the dispatcher; an undefined value drops the event without
/// touching book state.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Positional depth delta on a depth channel
    Depth {
        channel: ChannelId,
        side: i32,
        operation: i32,
        price: Decimal,
        size: Decimal,
        position: usize,
    },
    /// Trade print on a tick-by-tick channel
    Trade {
        channel: ChannelId,
        event_time: DateTime<Utc>,
        price: Decimal,
        size: Decimal,
    },
    /// Top-of-book field on a tape channel
    Quote {
        channel: ChannelId,
        field: i32,
        value: Decimal,
    },
    /// Vendor error or status code, possibly channel-scoped
    Error {
        channel: ChannelId,
        code: i32,
        message: String,
    },
    /// Transport closed by the peer
    Closed,
}

/// The vendor session primitives the core depends on.
///
/// Channel ids are allocated by the caller via `next_channel_id` and passed
/// to every subscribe call so the core can map inbound events back to
/// symbols without asking the session.
#[async_trait]
pub trait MarketSession: Send + Sync {
    /// Establish the wire session
    async fn connect(&self, host: &str, port: u16, client_id: i32) -> SessionResult<()>;

    /// Tear down the wire session
    async fn disconnect(&self) -> SessionResult<()>;

    /// Check if the session is established
    fn is_connected(&self) -> bool;

    /// Allocate the next request/channel identifier
    fn next_channel_id(&self) -> ChannelId;

    /// Open a top-of-book (tape) subscription routed to `venue`
    async fn subscribe_tape(
        &self,
        channel: ChannelId,
        symbol: &Symbol,
        venue: &Venue,
    ) -> SessionResult<()>;

    /// Cancel a tape subscription
    async fn cancel_tape(&self, channel: ChannelId) -> SessionResult<()>;

    /// Open a depth subscription with `rows` ladder rows per side
    async fn subscribe_depth(
        &self,
        channel: ChannelId,
        symbol: &Symbol,
        venue: &Venue,
        rows: usize,
    ) -> SessionResult<()>;

    /// Cancel a depth subscription
    async fn cancel_depth(&self, channel: ChannelId) -> SessionResult<()>;

    /// Open a tick-by-tick trade subscription routed to `venue`
    async fn subscribe_tick_by_tick(
        &self,
        channel: ChannelId,
        symbol: &Symbol,
        venue: &Venue,
    ) -> SessionResult<()>;

    /// Cancel a tick-by-tick subscription
    async fn cancel_tick_by_tick(&self, channel: ChannelId) -> SessionResult<()>;
}
