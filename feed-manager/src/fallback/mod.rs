//! Exchange fallback monitor.
//!
//! Channels opened against a primary (non-default) venue sometimes go
//! silent: the listing exchange produces no prints while smart routing
//! would. The monitor scans every subscription record on a short interval
//! and, for the tape and tick-by-tick channels independently, migrates a
//! channel to the default venue when it was opened on a primary venue and
//! the book has recorded no trade since the channel's receipt clock started
//! for longer than the configured timeout. Depth channels are governed by
//! the eligibility cache, not by this monitor.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use feed_common::data::Venue;

use crate::books::BookRegistry;
use crate::subscription::{SubscriptionManager, SubscriptionOps, SubscriptionRecord};

/// Periodic venue-fallback scanner.
pub struct ExchangeFallbackMonitor {
    manager: Arc<SubscriptionManager>,
    books: Arc<BookRegistry>,
    /// Silence window before a primary-venue channel is migrated
    receipt_timeout: Duration,
    scan_interval: std::time::Duration,
}

impl ExchangeFallbackMonitor {
    pub fn new(
        manager: Arc<SubscriptionManager>,
        books: Arc<BookRegistry>,
        receipt_timeout: Duration,
        scan_interval: std::time::Duration,
    ) -> Self {
        Self {
            manager,
            books,
            receipt_timeout,
            scan_interval,
        }
    }

    /// Run the scan loop until shutdown fires.
    pub async fn run(&self, ops: &dyn SubscriptionOps, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.scan_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.scan(ops, Utc::now()).await;
                }
                _ = shutdown_rx.recv() => {
                    debug!("Fallback monitor stopping");
                    break;
                }
            }
        }
    }

    /// One pass over all records.
    pub async fn scan(&self, ops: &dyn SubscriptionOps, now: DateTime<Utc>) {
        for record in self.manager.records().await {
            self.check_tape(&record, ops, now).await;
            self.check_tick(&record, ops, now).await;
        }
    }

    async fn check_tape(
        &self,
        record: &SubscriptionRecord,
        ops: &dyn SubscriptionOps,
        now: DateTime<Utc>,
    ) {
        let Some(channel) = record.tape_channel else {
            return;
        };
        if record.l1_venue.is_smart() {
            return;
        }
        let Some(first_receipt) = record.l1_first_receipt else {
            return;
        };
        if !self.is_silent(record, first_receipt, now) {
            return;
        }

        info!(
            "No trades for {} on {} since {}; falling back to smart routing",
            record.symbol, record.l1_venue, first_receipt
        );
        match ops.reroute_tape(channel, &record.symbol, &Venue::smart()).await {
            Ok(new_channel) => {
                self.manager
                    .replace_tape_channel(&record.symbol, channel, new_channel, Venue::smart(), now)
                    .await;
            }
            Err(e) => {
                warn!("Tape fallback failed for {}: {}", record.symbol, e);
            }
        }
    }

    async fn check_tick(
        &self,
        record: &SubscriptionRecord,
        ops: &dyn SubscriptionOps,
        now: DateTime<Utc>,
    ) {
        let Some(channel) = record.tick_channel else {
            return;
        };
        let venue = record.tick_venue.clone().unwrap_or_default();
        if venue.is_smart() {
            return;
        }
        let Some(first_receipt) = record.tick_first_receipt else {
            return;
        };
        if !self.is_silent(record, first_receipt, now) {
            return;
        }

        info!(
            "No trades for {} on {} (tick-by-tick) since {}; falling back to smart routing",
            record.symbol, venue, first_receipt
        );
        match ops.reroute_tick(channel, &record.symbol, &Venue::smart()).await {
            Ok(new_channel) => {
                self.manager
                    .replace_tick_channel(&record.symbol, channel, new_channel, Venue::smart(), now)
                    .await;
            }
            Err(e) => {
                warn!("Tick fallback failed for {}: {}", record.symbol, e);
            }
        }
    }

    /// True when the symbol's book shows no trade after `first_receipt` and
    /// the silence has outlasted the timeout.
    fn is_silent(
        &self,
        record: &SubscriptionRecord,
        first_receipt: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        if now - first_receipt <= self.receipt_timeout {
            return false;
        }
        match self.books.last_trade_at(&record.symbol) {
            Some(traded_at) => traded_at <= first_receipt,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{ChannelId, SessionResult};
    use crate::subscription::DepthEligibilityCache;
    use async_trait::async_trait;
    use feed_common::data::{Symbol, TradePrint};
    use parking_lot::Mutex as PlMutex;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    enum Reroute {
        Tape(Symbol, Venue),
        Tick(Symbol, Venue),
    }

    #[derive(Default)]
    struct FallbackOps {
        next_id: AtomicI64,
        reroutes: PlMutex<Vec<Reroute>>,
    }

    #[async_trait]
    impl SubscriptionOps for FallbackOps {
        async fn subscribe_tape(&self, _symbol: &Symbol) -> SessionResult<(ChannelId, Venue)> {
            Ok((
                self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
                Venue::new("ISLAND"),
            ))
        }

        async fn subscribe_depth(&self, _symbol: &Symbol) -> SessionResult<(ChannelId, Venue)> {
            Ok((self.next_id.fetch_add(1, Ordering::SeqCst) + 1, Venue::smart()))
        }

        async fn enable_tick(&self, _symbol: &Symbol) -> SessionResult<(ChannelId, Venue)> {
            Ok((
                self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
                Venue::new("ISLAND"),
            ))
        }

        async fn disable_tick(&self, _channel: ChannelId) -> SessionResult<()> {
            Ok(())
        }

        async fn disable_depth(&self, _channel: ChannelId) -> SessionResult<()> {
            Ok(())
        }

        async fn unsubscribe(&self, _record: &SubscriptionRecord) -> SessionResult<()> {
            Ok(())
        }

        async fn reroute_tape(
            &self,
            _old: ChannelId,
            symbol: &Symbol,
            venue: &Venue,
        ) -> SessionResult<ChannelId> {
            self.reroutes
                .lock()
                .push(Reroute::Tape(symbol.clone(), venue.clone()));
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn reroute_tick(
            &self,
            _old: ChannelId,
            symbol: &Symbol,
            venue: &Venue,
        ) -> SessionResult<ChannelId> {
            self.reroutes
                .lock()
                .push(Reroute::Tick(symbol.clone(), venue.clone()));
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    fn setup() -> (Arc<SubscriptionManager>, Arc<BookRegistry>, ExchangeFallbackMonitor) {
        let manager = Arc::new(SubscriptionManager::new(
            6,
            Arc::new(DepthEligibilityCache::new(Duration::seconds(3600))),
        ));
        let books = Arc::new(BookRegistry::new(10, 64));
        let monitor = ExchangeFallbackMonitor::new(
            manager.clone(),
            books.clone(),
            Duration::seconds(15),
            std::time::Duration::from_secs(5),
        );
        (manager, books, monitor)
    }

    #[tokio::test]
    async fn test_silent_primary_channels_migrate_to_smart() {
        let (manager, books, monitor) = setup();
        let ops = FallbackOps::default();
        let symbol = Symbol::new("AAPL");
        books.ensure(&symbol);

        manager.apply_universe(&[symbol.clone()], &ops).await;
        let record = manager.record_for(&symbol).await.unwrap();
        assert_eq!(record.l1_venue, Venue::new("ISLAND"));
        let opened = record.l1_first_receipt.unwrap();

        // Past the timeout with zero trades recorded
        monitor.scan(&ops, opened + Duration::seconds(20)).await;

        let reroutes = ops.reroutes.lock().clone();
        assert!(reroutes.contains(&Reroute::Tape(symbol.clone(), Venue::smart())));
        assert!(reroutes.contains(&Reroute::Tick(symbol.clone(), Venue::smart())));

        // Record now points at smart routing with a fresh receipt clock
        let record = manager.record_for(&symbol).await.unwrap();
        assert!(record.l1_venue.is_smart());
        assert!(record.tick_venue.as_ref().unwrap().is_smart());
        assert!(record.l1_first_receipt.unwrap() > opened);
    }

    #[tokio::test]
    async fn test_trades_keep_primary_venue() {
        let (manager, books, monitor) = setup();
        let ops = FallbackOps::default();
        let symbol = Symbol::new("MSFT");
        books.ensure(&symbol);

        manager.apply_universe(&[symbol.clone()], &ops).await;
        let opened = manager
            .record_for(&symbol)
            .await
            .unwrap()
            .l1_first_receipt
            .unwrap();

        // A trade lands after the channel opened
        let traded = opened + Duration::seconds(5);
        books
            .with_book(&symbol, |book| {
                book.record_trade(TradePrint::new(traded, traded, dec!(100), dec!(1)));
            })
            .unwrap();

        monitor.scan(&ops, opened + Duration::seconds(30)).await;
        assert!(ops.reroutes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_within_timeout_is_left_alone() {
        let (manager, books, monitor) = setup();
        let ops = FallbackOps::default();
        let symbol = Symbol::new("SPY");
        books.ensure(&symbol);

        manager.apply_universe(&[symbol.clone()], &ops).await;
        let opened = manager
            .record_for(&symbol)
            .await
            .unwrap()
            .l1_first_receipt
            .unwrap();

        monitor.scan(&ops, opened + Duration::seconds(10)).await;
        assert!(ops.reroutes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_smart_channels_never_migrate() {
        let (manager, _books, monitor) = setup();

        // Ops that subscribe everything on smart routing already
        #[derive(Default)]
        struct SmartOps(FallbackOps);

        #[async_trait]
        impl SubscriptionOps for SmartOps {
            async fn subscribe_tape(&self, _s: &Symbol) -> SessionResult<(ChannelId, Venue)> {
                Ok((self.0.next_id.fetch_add(1, Ordering::SeqCst) + 1, Venue::smart()))
            }
            async fn subscribe_depth(&self, s: &Symbol) -> SessionResult<(ChannelId, Venue)> {
                self.0.subscribe_depth(s).await
            }
            async fn enable_tick(&self, _s: &Symbol) -> SessionResult<(ChannelId, Venue)> {
                Ok((self.0.next_id.fetch_add(1, Ordering::SeqCst) + 1, Venue::smart()))
            }
            async fn disable_tick(&self, c: ChannelId) -> SessionResult<()> {
                self.0.disable_tick(c).await
            }
            async fn disable_depth(&self, c: ChannelId) -> SessionResult<()> {
                self.0.disable_depth(c).await
            }
            async fn unsubscribe(&self, r: &SubscriptionRecord) -> SessionResult<()> {
                self.0.unsubscribe(r).await
            }
            async fn reroute_tape(
                &self,
                o: ChannelId,
                s: &Symbol,
                v: &Venue,
            ) -> SessionResult<ChannelId> {
                self.0.reroute_tape(o, s, v).await
            }
            async fn reroute_tick(
                &self,
                o: ChannelId,
                s: &Symbol,
                v: &Venue,
            ) -> SessionResult<ChannelId> {
                self.0.reroute_tick(o, s, v).await
            }
        }

        let ops = SmartOps::default();
        let symbol = Symbol::new("QQQ");
        monitor.books.ensure(&symbol);
        monitor.manager.apply_universe(&[symbol.clone()], &ops).await;

        let opened = monitor
            .manager
            .record_for(&symbol)
            .await
            .unwrap()
            .l1_first_receipt
            .unwrap();
        monitor.scan(&ops, opened + Duration::seconds(60)).await;
        assert!(ops.0.reroutes.lock().is_empty());
    }
}
