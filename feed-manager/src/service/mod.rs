//! Feed service orchestration.
//!
//! `FeedService` owns the session-scoped state (books, subscription
//! records, channel maps) and runs the concurrent loops: a single reader
//! draining the session event queue, universe reconciliation, venue
//! fallback scanning, and a heartbeat. It also implements
//! `SubscriptionOps` over the live session, so the reconciliation policy
//! and the connection supervisor stay wire-agnostic.

use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::Utc;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use async_trait::async_trait;

use feed_common::data::{
    BookSide, BookSnapshot, DepthOperation, DepthOutcome, DepthUpdate, QuoteField, Symbol,
    TradePrint, Venue,
};
use feed_common::error::retry_with_backoff;

use crate::adapter::codes::{self, ErrorCodeClass};
use crate::adapter::{ChannelId, MarketSession, SessionError, SessionEvent, SessionResult};
use crate::books::BookRegistry;
use crate::config::Settings;
use crate::connection::ConnectionSupervisor;
use crate::fallback::ExchangeFallbackMonitor;
use crate::subscription::{
    DepthEligibilityCache, SubscriptionManager, SubscriptionOps, SubscriptionRecord,
    SubscriptionStats,
};
use crate::universe::UniverseSource;

/// Retries for a subscribe request that fails transiently
const SUBSCRIBE_RETRY_ATTEMPTS: u32 = 3;
const SUBSCRIBE_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(500);

const HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Service error types
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Task failed: {0}")]
    Task(String),
}

/// Market-data feed service.
pub struct FeedService {
    session: Arc<dyn MarketSession>,
    books: Arc<BookRegistry>,
    manager: Arc<SubscriptionManager>,
    eligibility: Arc<DepthEligibilityCache>,
    supervisor: Arc<ConnectionSupervisor>,
    universe: Arc<dyn UniverseSource>,
    settings: Settings,
    shutdown_tx: broadcast::Sender<()>,
    /// Paces outbound subscribe requests against the vendor message cap
    pacer: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl FeedService {
    pub fn new(
        session: Arc<dyn MarketSession>,
        universe: Arc<dyn UniverseSource>,
        settings: Settings,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(16);

        let eligibility = Arc::new(DepthEligibilityCache::new(settings.eligibility.cooloff()));
        let books = Arc::new(BookRegistry::new(
            settings.subscription.depth_rows(),
            settings.subscription.tape_capacity,
        ));
        let manager = Arc::new(SubscriptionManager::new(
            settings.subscription.tick_ceiling,
            eligibility.clone(),
        ));
        let supervisor = Arc::new(ConnectionSupervisor::new(
            session.clone(),
            manager.clone(),
            books.clone(),
            settings.session.clone(),
            settings.reconnect.clone(),
        ));

        let quota = Quota::per_second(
            NonZeroU32::new(settings.subscription.subscribe_rate_per_sec.max(1))
                .expect("subscribe rate must be > 0"),
        );

        Arc::new(Self {
            session,
            books,
            manager,
            eligibility,
            supervisor,
            universe,
            settings,
            shutdown_tx,
            pacer: RateLimiter::direct(quota),
        })
    }

    /// Sender half of the shutdown signal; every loop wakes on it
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Signal every loop to stop
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn books(&self) -> &Arc<BookRegistry> {
        &self.books
    }

    pub fn manager(&self) -> &Arc<SubscriptionManager> {
        &self.manager
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    /// Active channel counts, for health reporting
    pub async fn subscription_stats(&self) -> SubscriptionStats {
        self.manager.stats().await
    }

    /// Read-only book snapshots for downstream consumers
    pub fn book_snapshots(&self) -> Vec<BookSnapshot> {
        self.books.snapshots(Utc::now())
    }

    /// Connect and run all service loops until shutdown.
    pub async fn start(
        self: Arc<Self>,
        events: mpsc::Receiver<SessionEvent>,
    ) -> Result<(), ServiceError> {
        self.supervisor.connect().await?;

        info!("Starting feed service loops");
        let dispatch = tokio::spawn(self.clone().dispatch_loop(events));
        let universe = tokio::spawn(self.clone().universe_loop());
        let fallback = tokio::spawn(self.clone().fallback_loop());
        let heartbeat = tokio::spawn(self.clone().heartbeat_loop());

        let result = tokio::try_join!(dispatch, universe, fallback, heartbeat);

        self.supervisor.shutdown().await;
        match result {
            Ok(_) => {
                info!("Feed service stopped");
                Ok(())
            }
            Err(e) => Err(ServiceError::Task(e.to_string())),
        }
    }

    /// Single reader draining the session's inbound queue.
    ///
    /// Every callback resolves its symbol, decodes wire enums, and mutates
    /// the book under that symbol's lock; nothing here blocks on I/O.
    async fn dispatch_loop(self: Arc<Self>, mut events: mpsc::Receiver<SessionEvent>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            warn!("Session event stream ended");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        debug!("Dispatch loop stopped");
    }

    async fn handle_event(self: &Arc<Self>, event: SessionEvent) {
        match event {
            SessionEvent::Depth {
                channel,
                side,
                operation,
                price,
                size,
                position,
            } => {
                let Some(symbol) = self.manager.symbol_for_channel(channel) else {
                    debug!("Depth update for unknown channel {}", channel);
                    return;
                };
                let (side, operation) = match (
                    BookSide::from_wire(side),
                    DepthOperation::from_wire(operation),
                ) {
                    (Ok(side), Ok(operation)) => (side, operation),
                    (Err(e), _) | (_, Err(e)) => {
                        // Malformed payload: drop it, leave the book alone
                        warn!("Dropping depth update for {}: {}", symbol, e);
                        return;
                    }
                };
                let update = DepthUpdate::new(side, operation, price, size, position, Utc::now());
                match self.books.with_book(&symbol, |book| book.apply_depth(&update)) {
                    Some(DepthOutcome::Applied) => self.eligibility.mark_eligible(&symbol),
                    Some(DepthOutcome::OutOfRange) => {
                        debug!("Out-of-range depth position {} for {}", position, symbol);
                    }
                    Some(DepthOutcome::OrderingViolation) => {
                        warn!(
                            "Dropped depth {} at {} for {}: would break side ordering",
                            update.operation, position, symbol
                        );
                    }
                    None => debug!("Depth update for {} after book removal", symbol),
                }
            }
            SessionEvent::Trade {
                channel,
                event_time,
                price,
                size,
            } => {
                let Some(symbol) = self.manager.symbol_for_channel(channel) else {
                    debug!("Trade for unknown channel {}", channel);
                    return;
                };
                let print = TradePrint::new(event_time, Utc::now(), price, size);
                if self
                    .books
                    .with_book(&symbol, |book| book.record_trade(print))
                    .is_none()
                {
                    debug!("Trade for {} after book removal", symbol);
                }
            }
            SessionEvent::Quote { channel, field, value } => {
                let Some(symbol) = self.manager.symbol_for_channel(channel) else {
                    debug!("Quote for unknown channel {}", channel);
                    return;
                };
                match QuoteField::from_wire(field) {
                    Ok(field) => {
                        if self
                            .books
                            .with_book(&symbol, |book| book.apply_quote(field, value, Utc::now()))
                            .is_none()
                        {
                            debug!("Quote for {} after book removal", symbol);
                        }
                    }
                    Err(e) => debug!("Ignoring quote for {}: {}", symbol, e),
                }
            }
            SessionEvent::Error { channel, code, message } => {
                if codes::classify(code) == ErrorCodeClass::TransportFatal {
                    warn!("Transport error {} on channel {}: {}", code, channel, message);
                    self.trigger_reconnect();
                } else {
                    self.manager
                        .handle_error(channel, code, &message, self.as_ref())
                        .await;
                }
            }
            SessionEvent::Closed => {
                warn!("Session closed by peer");
                self.trigger_reconnect();
            }
        }
    }

    /// Kick off the supervisor's reconnect sequence; concurrent triggers
    /// fold into the attempt already in flight.
    fn trigger_reconnect(self: &Arc<Self>) {
        let service = self.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = service.shutdown_tx.subscribe();
            match service
                .supervisor
                .handle_disconnect(service.as_ref(), &mut shutdown_rx)
                .await
            {
                Ok(_) => {}
                Err(e) => {
                    error!("Reconnect failed permanently: {}", e);
                    service.stop();
                }
            }
        });
    }

    /// Periodic universe reconciliation.
    async fn universe_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut ticker = interval(self.settings.subscription.refresh_interval());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let universe = self.universe.fetch().await;
                    if universe.is_empty() {
                        debug!("Universe is empty; nothing to reconcile");
                    }
                    // A pass can span many paced subscribe calls; abandon it
                    // immediately on shutdown rather than finishing out
                    tokio::select! {
                        _ = self.manager.apply_universe(&universe, self.as_ref()) => {}
                        _ = shutdown_rx.recv() => break,
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        debug!("Universe loop stopped");
    }

    /// Periodic venue fallback scanning.
    async fn fallback_loop(self: Arc<Self>) {
        let monitor = ExchangeFallbackMonitor::new(
            self.manager.clone(),
            self.books.clone(),
            self.settings.timeouts.receipt_timeout(),
            self.settings.fallback.scan_interval(),
        );
        monitor
            .run(self.as_ref(), self.shutdown_tx.subscribe())
            .await;
    }

    /// Periodic health log: channel counts and freshest tick age.
    async fn heartbeat_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut ticker = interval(HEARTBEAT_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = self.manager.stats().await;
                    let snapshots = self.books.snapshots(Utc::now());
                    let freshest_ms = snapshots
                        .iter()
                        .filter_map(|s| s.tick_age_ms.or(s.l1_age_ms))
                        .min();
                    let age = freshest_ms
                        .map(|ms| format!("{}ms", ms))
                        .unwrap_or_else(|| "n/a".to_string());
                    info!(
                        "Feed health: {:?} | tape {} depth {} tick {} | books {} | last tick age {}",
                        self.supervisor.state().phase,
                        stats.tape_count,
                        stats.depth_count,
                        stats.tick_count,
                        snapshots.len(),
                        age
                    );
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    /// Venue tape/tick channels open against first
    fn initial_venue(&self) -> Venue {
        self.settings
            .subscription
            .primary_venue
            .as_deref()
            .map(Venue::new)
            .unwrap_or_else(Venue::smart)
    }
}

#[async_trait]
impl SubscriptionOps for FeedService {
    async fn subscribe_tape(&self, symbol: &Symbol) -> SessionResult<(ChannelId, Venue)> {
        self.pacer.until_ready().await;
        let channel = self.session.next_channel_id();
        let venue = self.initial_venue();
        retry_with_backoff(
            || self.session.subscribe_tape(channel, symbol, &venue),
            SUBSCRIBE_RETRY_ATTEMPTS,
            SUBSCRIBE_RETRY_DELAY,
        )
        .await?;
        self.books.ensure(symbol);
        Ok((channel, venue))
    }

    async fn subscribe_depth(&self, symbol: &Symbol) -> SessionResult<(ChannelId, Venue)> {
        self.pacer.until_ready().await;
        let channel = self.session.next_channel_id();
        let venue = Venue::smart();
        let rows = self.settings.subscription.depth_rows();
        retry_with_backoff(
            || self.session.subscribe_depth(channel, symbol, &venue, rows),
            SUBSCRIBE_RETRY_ATTEMPTS,
            SUBSCRIBE_RETRY_DELAY,
        )
        .await?;
        self.books.ensure(symbol);
        Ok((channel, venue))
    }

    async fn enable_tick(&self, symbol: &Symbol) -> SessionResult<(ChannelId, Venue)> {
        self.pacer.until_ready().await;
        let channel = self.session.next_channel_id();
        let venue = self.initial_venue();
        retry_with_backoff(
            || self.session.subscribe_tick_by_tick(channel, symbol, &venue),
            SUBSCRIBE_RETRY_ATTEMPTS,
            SUBSCRIBE_RETRY_DELAY,
        )
        .await?;
        Ok((channel, venue))
    }

    async fn disable_tick(&self, channel: ChannelId) -> SessionResult<()> {
        self.session.cancel_tick_by_tick(channel).await
    }

    async fn disable_depth(&self, channel: ChannelId) -> SessionResult<()> {
        self.session.cancel_depth(channel).await
    }

    async fn unsubscribe(&self, record: &SubscriptionRecord) -> SessionResult<()> {
        // Best effort per channel; the record is gone either way
        if let Some(channel) = record.tape_channel {
            if let Err(e) = self.session.cancel_tape(channel).await {
                warn!("Cancel tape failed for {}: {}", record.symbol, e);
            }
        }
        if let Some(channel) = record.depth_channel {
            if let Err(e) = self.session.cancel_depth(channel).await {
                warn!("Cancel depth failed for {}: {}", record.symbol, e);
            }
        }
        if let Some(channel) = record.tick_channel {
            if let Err(e) = self.session.cancel_tick_by_tick(channel).await {
                warn!("Cancel tick failed for {}: {}", record.symbol, e);
            }
        }
        self.books.remove(&record.symbol);
        Ok(())
    }

    async fn reroute_tape(
        &self,
        old: ChannelId,
        symbol: &Symbol,
        venue: &Venue,
    ) -> SessionResult<ChannelId> {
        if let Err(e) = self.session.cancel_tape(old).await {
            warn!("Cancel during tape reroute failed for {}: {}", symbol, e);
        }
        self.pacer.until_ready().await;
        let channel = self.session.next_channel_id();
        self.session.subscribe_tape(channel, symbol, venue).await?;
        Ok(channel)
    }

    async fn reroute_tick(
        &self,
        old: ChannelId,
        symbol: &Symbol,
        venue: &Venue,
    ) -> SessionResult<ChannelId> {
        if let Err(e) = self.session.cancel_tick_by_tick(old).await {
            warn!("Cancel during tick reroute failed for {}: {}", symbol, e);
        }
        self.pacer.until_ready().await;
        let channel = self.session.next_channel_id();
        self.session
            .subscribe_tick_by_tick(channel, symbol, venue)
            .await?;
        Ok(channel)
    }
}
