//! Injected protocol operations for reconciliation.

use async_trait::async_trait;

use feed_common::data::{Symbol, Venue};

use crate::adapter::{ChannelId, SessionResult};

use super::manager::SubscriptionRecord;

/// Protocol operations the reconciliation policy invokes.
///
/// Implemented by the feed service over the live session; tests supply a
/// recorder. Subscribe calls return the allocated channel id and the venue
/// the channel was opened against so the manager can maintain its maps.
#[async_trait]
pub trait SubscriptionOps: Send + Sync {
    /// Open the top-of-book (tape) channel for a symbol
    async fn subscribe_tape(&self, symbol: &Symbol) -> SessionResult<(ChannelId, Venue)>;

    /// Open a depth channel for a symbol
    async fn subscribe_depth(&self, symbol: &Symbol) -> SessionResult<(ChannelId, Venue)>;

    /// Open a tick-by-tick channel for a symbol
    async fn enable_tick(&self, symbol: &Symbol) -> SessionResult<(ChannelId, Venue)>;

    /// Cancel a tick-by-tick channel
    async fn disable_tick(&self, channel: ChannelId) -> SessionResult<()>;

    /// Cancel a depth channel
    async fn disable_depth(&self, channel: ChannelId) -> SessionResult<()>;

    /// Tear down every channel of a record and drop its book
    async fn unsubscribe(&self, record: &SubscriptionRecord) -> SessionResult<()>;

    /// Cancel a tape channel and reopen it routed to `venue`
    async fn reroute_tape(
        &self,
        old: ChannelId,
        symbol: &Symbol,
        venue: &Venue,
    ) -> SessionResult<ChannelId>;

    /// Cancel a tick-by-tick channel and reopen it routed to `venue`
    async fn reroute_tick(
        &self,
        old: ChannelId,
        symbol: &Symbol,
        venue: &Venue,
    ) -> SessionResult<ChannelId>;
}
