//! Subscription manager
//!
//! Reconciles the prioritized universe against active subscriptions and
//! reacts to vendor rejection codes. Tape (L1) channels are unlimited,
//! depth is gated by the eligibility cache, and tick-by-tick is held to a
//! hard concurrency ceiling assigned in priority order.
//!
//! Structural changes run under one coarse `tokio::sync::Mutex`; churn is
//! bounded by the universe refresh interval, so correctness wins over
//! throughput here. The channel→symbol map has its own read-optimized lock
//! because it is consulted on every inbound callback.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use feed_common::data::{Symbol, Venue};

use crate::adapter::codes::{self, ErrorCodeClass};
use crate::adapter::ChannelId;

use super::eligibility::DepthEligibilityCache;
use super::ops::SubscriptionOps;

/// Security classification passed to the eligibility cache for log context
const SECURITY_CLASS: &str = "STK";

/// Channel state for one actively-subscribed symbol.
///
/// Records are immutable values: every mutation clones the current record,
/// edits the copy, and swaps the `Arc`, so concurrent readers never observe
/// a partially-updated record.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRecord {
    pub symbol: Symbol,
    pub tape_channel: Option<ChannelId>,
    pub depth_channel: Option<ChannelId>,
    pub tick_channel: Option<ChannelId>,
    /// Venue the tape channel is routed to
    pub l1_venue: Venue,
    pub depth_venue: Option<Venue>,
    pub tick_venue: Option<Venue>,
    /// When the tape channel was (re)opened; fallback clock
    pub l1_first_receipt: Option<DateTime<Utc>>,
    /// When the tick channel was (re)opened; fallback clock
    pub tick_first_receipt: Option<DateTime<Utc>>,
}

impl SubscriptionRecord {
    fn new(symbol: Symbol, tape_channel: ChannelId, venue: Venue, now: DateTime<Utc>) -> Self {
        Self {
            symbol,
            tape_channel: Some(tape_channel),
            depth_channel: None,
            tick_channel: None,
            l1_venue: venue,
            depth_venue: None,
            tick_venue: None,
            l1_first_receipt: Some(now),
            tick_first_receipt: None,
        }
    }

    /// All live channel ids held by this record
    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        [self.tape_channel, self.depth_channel, self.tick_channel]
            .into_iter()
            .flatten()
    }
}

/// Active channel counts by type, for heartbeat reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    pub tape_count: usize,
    pub depth_count: usize,
    pub tick_count: usize,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileReport {
    pub subscribed: usize,
    pub unsubscribed: usize,
    pub tick_enabled: usize,
    pub tick_disabled: usize,
    pub depth_requested: usize,
    pub depth_skipped: usize,
    pub failures: usize,
}

/// Reconciles universe membership against vendor subscription channels.
pub struct SubscriptionManager {
    records: Mutex<HashMap<Symbol, Arc<SubscriptionRecord>>>,
    channels: RwLock<HashMap<ChannelId, Symbol>>,
    eligibility: Arc<DepthEligibilityCache>,
    tick_ceiling: usize,
}

impl SubscriptionManager {
    pub fn new(tick_ceiling: usize, eligibility: Arc<DepthEligibilityCache>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            eligibility,
            tick_ceiling,
        }
    }

    /// Resolve the symbol a vendor channel belongs to.
    ///
    /// Called on every inbound callback; takes only the read-optimized
    /// channel-map lock.
    pub fn symbol_for_channel(&self, channel: ChannelId) -> Option<Symbol> {
        self.channels.read().get(&channel).cloned()
    }

    /// Current record for a symbol
    pub async fn record_for(&self, symbol: &Symbol) -> Option<Arc<SubscriptionRecord>> {
        self.records.lock().await.get(symbol).cloned()
    }

    /// Snapshot of all records (fallback scan)
    pub async fn records(&self) -> Vec<Arc<SubscriptionRecord>> {
        self.records.lock().await.values().cloned().collect()
    }

    /// Symbols currently holding a subscription, for reconnect recovery
    pub async fn active_symbols(&self) -> Vec<Symbol> {
        self.records.lock().await.keys().cloned().collect()
    }

    /// Active channel counts by type
    pub async fn stats(&self) -> SubscriptionStats {
        let records = self.records.lock().await;
        let mut stats = SubscriptionStats::default();
        for record in records.values() {
            stats.tape_count += usize::from(record.tape_channel.is_some());
            stats.depth_count += usize::from(record.depth_channel.is_some());
            stats.tick_count += usize::from(record.tick_channel.is_some());
        }
        stats
    }

    /// Drop all records and channel mappings (disconnect path). Channel ids
    /// are meaningless once the session is gone, so nothing is canceled.
    pub async fn clear(&self) {
        self.records.lock().await.clear();
        self.channels.write().clear();
    }

    /// Reconcile the prioritized universe against active subscriptions.
    ///
    /// Symbols absent from `universe` are fully unsubscribed; new symbols
    /// get tape (and depth when eligible); tick-by-tick is assigned to the
    /// highest-priority symbols with a base subscription, up to the
    /// ceiling. A failure on one symbol never aborts the pass.
    pub async fn apply_universe(
        &self,
        universe: &[Symbol],
        ops: &dyn SubscriptionOps,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let now = Utc::now();
        let wanted: HashSet<&Symbol> = universe.iter().collect();

        let mut records = self.records.lock().await;

        // Drop symbols that left the universe
        let departed: Vec<Symbol> = records
            .keys()
            .filter(|s| !wanted.contains(*s))
            .cloned()
            .collect();
        for symbol in departed {
            if let Some(record) = records.remove(&symbol) {
                {
                    let mut channels = self.channels.write();
                    for channel in record.channel_ids() {
                        channels.remove(&channel);
                    }
                }
                if let Err(e) = ops.unsubscribe(&record).await {
                    warn!("Unsubscribe failed for {}: {}", symbol, e);
                    report.failures += 1;
                }
                report.unsubscribed += 1;
                debug!("Unsubscribed {}", symbol);
            }
        }

        // Base subscriptions (tape + depth) in priority order
        for symbol in universe {
            if !records.contains_key(symbol) {
                match ops.subscribe_tape(symbol).await {
                    Ok((channel, venue)) => {
                        self.channels.write().insert(channel, symbol.clone());
                        records.insert(
                            symbol.clone(),
                            Arc::new(SubscriptionRecord::new(
                                symbol.clone(),
                                channel,
                                venue,
                                now,
                            )),
                        );
                        report.subscribed += 1;
                    }
                    Err(e) => {
                        warn!("Tape subscribe failed for {}: {}", symbol, e);
                        report.failures += 1;
                        continue;
                    }
                }
            }

            let has_depth = records
                .get(symbol)
                .map(|r| r.depth_channel.is_some())
                .unwrap_or(false);
            if !has_depth {
                let (allowed, _state) =
                    self.eligibility
                        .can_request_depth(SECURITY_CLASS, symbol, now);
                if !allowed {
                    report.depth_skipped += 1;
                    continue;
                }
                match ops.subscribe_depth(symbol).await {
                    Ok((channel, venue)) => {
                        self.channels.write().insert(channel, symbol.clone());
                        Self::update_record(&mut records, symbol, |r| {
                            r.depth_channel = Some(channel);
                            r.depth_venue = Some(venue);
                        });
                        report.depth_requested += 1;
                    }
                    Err(e) => {
                        warn!("Depth subscribe failed for {}: {}", symbol, e);
                        report.failures += 1;
                    }
                }
            }
        }

        // Tick-by-tick for the top of the priority order, up to the ceiling
        let mut tick_slots = 0usize;
        for symbol in universe {
            let Some(record) = records.get(symbol).cloned() else {
                continue;
            };
            if tick_slots < self.tick_ceiling {
                if record.tick_channel.is_some() {
                    tick_slots += 1;
                } else {
                    match ops.enable_tick(symbol).await {
                        Ok((channel, venue)) => {
                            self.channels.write().insert(channel, symbol.clone());
                            Self::update_record(&mut records, symbol, |r| {
                                r.tick_channel = Some(channel);
                                r.tick_venue = Some(venue);
                                r.tick_first_receipt = Some(now);
                            });
                            tick_slots += 1;
                            report.tick_enabled += 1;
                        }
                        Err(e) => {
                            warn!("Tick-by-tick enable failed for {}: {}", symbol, e);
                            report.failures += 1;
                        }
                    }
                }
            } else if let Some(channel) = record.tick_channel {
                // Fell below the ceiling; demote to tape(+depth) only
                if let Err(e) = ops.disable_tick(channel).await {
                    warn!("Tick-by-tick disable failed for {}: {}", symbol, e);
                    report.failures += 1;
                }
                self.channels.write().remove(&channel);
                Self::update_record(&mut records, symbol, |r| {
                    r.tick_channel = None;
                    r.tick_venue = None;
                    r.tick_first_receipt = None;
                });
                report.tick_disabled += 1;
            }
        }

        info!(
            "Universe reconciled: {} symbols, +{} -{} subs, tick +{}/-{}, depth +{} (skipped {}), {} failures",
            universe.len(),
            report.subscribed,
            report.unsubscribed,
            report.tick_enabled,
            report.tick_disabled,
            report.depth_requested,
            report.depth_skipped,
            report.failures
        );
        report
    }

    /// React to a vendor error code scoped to one channel.
    ///
    /// Corrections are symbol-scoped state transitions; nothing here tears
    /// down the session or aborts reconciliation.
    pub async fn handle_error(
        &self,
        channel: ChannelId,
        code: i32,
        message: &str,
        ops: &dyn SubscriptionOps,
    ) {
        match codes::classify(code) {
            ErrorCodeClass::Informational => {
                debug!("Vendor status {} on channel {}: {}", code, channel, message);
            }
            ErrorCodeClass::TickCapacityExhausted => {
                let Some(symbol) = self.symbol_for_channel(channel) else {
                    debug!("Capacity code {} for unknown channel {}", code, channel);
                    return;
                };
                let mut records = self.records.lock().await;
                let held_tick = records
                    .get(&symbol)
                    .map(|r| r.tick_channel == Some(channel))
                    .unwrap_or(false);
                if held_tick {
                    // Free the slot only; tape/depth stay live. The next
                    // reconciliation pass decides who gets the slot.
                    Self::update_record(&mut records, &symbol, |r| {
                        r.tick_channel = None;
                        r.tick_venue = None;
                        r.tick_first_receipt = None;
                    });
                    self.channels.write().remove(&channel);
                    warn!(
                        "Tick-by-tick capacity exhausted; cleared tick channel {} for {}",
                        channel, symbol
                    );
                }
            }
            ErrorCodeClass::DepthUnsupported => {
                let Some(symbol) = self.symbol_for_channel(channel) else {
                    debug!("Depth-unsupported code {} for unknown channel {}", code, channel);
                    return;
                };
                self.eligibility.mark_ineligible(&symbol, message, Utc::now());
                let mut records = self.records.lock().await;
                let depth_channel = records.get(&symbol).and_then(|r| r.depth_channel);
                if let Some(depth_channel) = depth_channel {
                    if let Err(e) = ops.disable_depth(depth_channel).await {
                        warn!("Depth disable failed for {}: {}", symbol, e);
                    }
                    self.channels.write().remove(&depth_channel);
                    Self::update_record(&mut records, &symbol, |r| {
                        r.depth_channel = None;
                        r.depth_venue = None;
                    });
                }
            }
            ErrorCodeClass::TransportFatal => {
                // Routed to the connection supervisor by the dispatcher;
                // nothing to correct at subscription level
                debug!("Transport code {} on channel {}: {}", code, channel, message);
            }
            ErrorCodeClass::Unclassified => {
                warn!("Vendor error {} on channel {}: {}", code, channel, message);
            }
        }
    }

    /// Swap the tape channel after a venue fallback migration
    pub async fn replace_tape_channel(
        &self,
        symbol: &Symbol,
        old: ChannelId,
        new: ChannelId,
        venue: Venue,
        now: DateTime<Utc>,
    ) {
        let mut records = self.records.lock().await;
        {
            let mut channels = self.channels.write();
            channels.remove(&old);
            channels.insert(new, symbol.clone());
        }
        Self::update_record(&mut records, symbol, |r| {
            r.tape_channel = Some(new);
            r.l1_venue = venue;
            r.l1_first_receipt = Some(now);
        });
    }

    /// Swap the tick channel after a venue fallback migration
    pub async fn replace_tick_channel(
        &self,
        symbol: &Symbol,
        old: ChannelId,
        new: ChannelId,
        venue: Venue,
        now: DateTime<Utc>,
    ) {
        let mut records = self.records.lock().await;
        {
            let mut channels = self.channels.write();
            channels.remove(&old);
            channels.insert(new, symbol.clone());
        }
        Self::update_record(&mut records, symbol, |r| {
            r.tick_channel = Some(new);
            r.tick_venue = Some(venue);
            r.tick_first_receipt = Some(now);
        });
    }

    /// Copy-on-write record replacement: readers holding the old `Arc`
    /// never see a partial update.
    fn update_record(
        records: &mut HashMap<Symbol, Arc<SubscriptionRecord>>,
        symbol: &Symbol,
        edit: impl FnOnce(&mut SubscriptionRecord),
    ) {
        if let Some(existing) = records.get(symbol) {
            let mut updated = (**existing).clone();
            edit(&mut updated);
            records.insert(symbol.clone(), Arc::new(updated));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::codes::{DEPTH_NOT_SUPPORTED, TICK_CAPACITY_EXHAUSTED};
    use crate::adapter::{SessionError, SessionResult};
    use async_trait::async_trait;
    use chrono::Duration;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    enum OpCall {
        Tape(Symbol),
        Depth(Symbol),
        Tick(Symbol),
        DisableTick(ChannelId),
        DisableDepth(ChannelId),
        Unsubscribe(Symbol),
    }

    /// Records reconciliation decisions without a wire
    #[derive(Default)]
    struct RecorderOps {
        next_id: AtomicI64,
        calls: PlMutex<Vec<OpCall>>,
        fail_tape_for: Option<Symbol>,
    }

    impl RecorderOps {
        fn alloc(&self) -> ChannelId {
            self.next_id.fetch_add(1, Ordering::SeqCst) + 1
        }

        fn calls(&self) -> Vec<OpCall> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl SubscriptionOps for RecorderOps {
        async fn subscribe_tape(&self, symbol: &Symbol) -> SessionResult<(ChannelId, Venue)> {
            if self.fail_tape_for.as_ref() == Some(symbol) {
                return Err(SessionError::Send("scripted failure".to_string()));
            }
            self.calls.lock().push(OpCall::Tape(symbol.clone()));
            Ok((self.alloc(), Venue::new("ISLAND")))
        }

        async fn subscribe_depth(&self, symbol: &Symbol) -> SessionResult<(ChannelId, Venue)> {
            self.calls.lock().push(OpCall::Depth(symbol.clone()));
            Ok((self.alloc(), Venue::smart()))
        }

        async fn enable_tick(&self, symbol: &Symbol) -> SessionResult<(ChannelId, Venue)> {
            self.calls.lock().push(OpCall::Tick(symbol.clone()));
            Ok((self.alloc(), Venue::new("ISLAND")))
        }

        async fn disable_tick(&self, channel: ChannelId) -> SessionResult<()> {
            self.calls.lock().push(OpCall::DisableTick(channel));
            Ok(())
        }

        async fn disable_depth(&self, channel: ChannelId) -> SessionResult<()> {
            self.calls.lock().push(OpCall::DisableDepth(channel));
            Ok(())
        }

        async fn unsubscribe(&self, record: &SubscriptionRecord) -> SessionResult<()> {
            self.calls
                .lock()
                .push(OpCall::Unsubscribe(record.symbol.clone()));
            Ok(())
        }

        async fn reroute_tape(
            &self,
            _old: ChannelId,
            _symbol: &Symbol,
            _venue: &Venue,
        ) -> SessionResult<ChannelId> {
            Ok(self.alloc())
        }

        async fn reroute_tick(
            &self,
            _old: ChannelId,
            _symbol: &Symbol,
            _venue: &Venue,
        ) -> SessionResult<ChannelId> {
            Ok(self.alloc())
        }
    }

    fn manager(tick_ceiling: usize) -> SubscriptionManager {
        SubscriptionManager::new(
            tick_ceiling,
            Arc::new(DepthEligibilityCache::new(Duration::seconds(3600))),
        )
    }

    fn symbols(names: &[&str]) -> Vec<Symbol> {
        names.iter().map(Symbol::new).collect()
    }

    #[tokio::test]
    async fn test_new_universe_subscribes_tape_and_depth() {
        let manager = manager(6);
        let ops = RecorderOps::default();

        let report = manager.apply_universe(&symbols(&["AAPL", "MSFT"]), &ops).await;

        assert_eq!(report.subscribed, 2);
        assert_eq!(report.depth_requested, 2);
        assert_eq!(report.failures, 0);

        let stats = manager.stats().await;
        assert_eq!(stats.tape_count, 2);
        assert_eq!(stats.depth_count, 2);
        assert_eq!(stats.tick_count, 2); // both fit under the ceiling
    }

    #[tokio::test]
    async fn test_tick_ceiling_assigned_by_priority() {
        let manager = manager(2);
        let ops = RecorderOps::default();

        manager
            .apply_universe(&symbols(&["A", "B", "C"]), &ops)
            .await;

        let a = manager.record_for(&Symbol::new("A")).await.unwrap();
        let b = manager.record_for(&Symbol::new("B")).await.unwrap();
        let c = manager.record_for(&Symbol::new("C")).await.unwrap();

        assert!(a.tick_channel.is_some());
        assert!(b.tick_channel.is_some());
        assert!(c.tick_channel.is_none());
        assert!(c.tape_channel.is_some());
        assert!(c.depth_channel.is_some());

        let stats = manager.stats().await;
        assert_eq!(stats.tick_count, 2);
    }

    #[tokio::test]
    async fn test_removed_symbol_fully_unsubscribed_and_slot_reassigned_next_pass() {
        let manager = manager(2);
        let ops = RecorderOps::default();

        manager
            .apply_universe(&symbols(&["A", "B", "C"]), &ops)
            .await;
        assert!(manager
            .record_for(&Symbol::new("C"))
            .await
            .unwrap()
            .tick_channel
            .is_none());

        // B leaves; only on this next pass does C inherit the slot
        let report = manager.apply_universe(&symbols(&["A", "C"]), &ops).await;

        assert_eq!(report.unsubscribed, 1);
        assert!(manager.record_for(&Symbol::new("B")).await.is_none());
        assert!(ops.calls().contains(&OpCall::Unsubscribe(Symbol::new("B"))));
        assert!(manager
            .record_for(&Symbol::new("C"))
            .await
            .unwrap()
            .tick_channel
            .is_some());
    }

    #[tokio::test]
    async fn test_priority_drop_demotes_tick() {
        let manager = manager(1);
        let ops = RecorderOps::default();

        manager.apply_universe(&symbols(&["A", "B"]), &ops).await;
        let a_tick = manager
            .record_for(&Symbol::new("A"))
            .await
            .unwrap()
            .tick_channel
            .unwrap();

        // B outranks A now; A is demoted to tape(+depth) only
        let report = manager.apply_universe(&symbols(&["B", "A"]), &ops).await;

        assert_eq!(report.tick_enabled, 1);
        assert_eq!(report.tick_disabled, 1);
        assert!(ops.calls().contains(&OpCall::DisableTick(a_tick)));

        let a = manager.record_for(&Symbol::new("A")).await.unwrap();
        assert!(a.tick_channel.is_none());
        assert!(a.tape_channel.is_some());
    }

    #[tokio::test]
    async fn test_tick_capacity_error_clears_only_tick_channel() {
        let manager = manager(6);
        let ops = RecorderOps::default();

        manager.apply_universe(&symbols(&["AAPL"]), &ops).await;
        let record = manager.record_for(&Symbol::new("AAPL")).await.unwrap();
        let tick_channel = record.tick_channel.unwrap();

        manager
            .handle_error(tick_channel, TICK_CAPACITY_EXHAUSTED, "limit reached", &ops)
            .await;

        let record = manager.record_for(&Symbol::new("AAPL")).await.unwrap();
        assert!(record.tick_channel.is_none());
        assert!(record.tape_channel.is_some());
        assert!(record.depth_channel.is_some());
        assert!(manager.symbol_for_channel(tick_channel).is_none());
    }

    #[tokio::test]
    async fn test_depth_unsupported_disables_and_suppresses() {
        let eligibility = Arc::new(DepthEligibilityCache::new(Duration::seconds(3600)));
        let manager = SubscriptionManager::new(6, eligibility.clone());
        let ops = RecorderOps::default();

        manager.apply_universe(&symbols(&["VXX"]), &ops).await;
        let record = manager.record_for(&Symbol::new("VXX")).await.unwrap();
        let depth_channel = record.depth_channel.unwrap();

        manager
            .handle_error(depth_channel, DEPTH_NOT_SUPPORTED, "not supported", &ops)
            .await;

        let record = manager.record_for(&Symbol::new("VXX")).await.unwrap();
        assert!(record.depth_channel.is_none());
        assert!(record.tape_channel.is_some());
        assert!(ops.calls().contains(&OpCall::DisableDepth(depth_channel)));

        // Subsequent passes skip depth while the marking holds
        let before = ops
            .calls()
            .iter()
            .filter(|c| matches!(c, OpCall::Depth(_)))
            .count();
        let report = manager.apply_universe(&symbols(&["VXX"]), &ops).await;
        let after = ops
            .calls()
            .iter()
            .filter(|c| matches!(c, OpCall::Depth(_)))
            .count();
        assert_eq!(before, after);
        assert_eq!(report.depth_skipped, 1);
    }

    #[tokio::test]
    async fn test_informational_codes_are_ignored() {
        let manager = manager(6);
        let ops = RecorderOps::default();

        manager.apply_universe(&symbols(&["AAPL"]), &ops).await;
        let record = manager.record_for(&Symbol::new("AAPL")).await.unwrap();
        let before = record.clone();

        manager
            .handle_error(record.tape_channel.unwrap(), 2104, "farm OK", &ops)
            .await;

        let after = manager.record_for(&Symbol::new("AAPL")).await.unwrap();
        assert_eq!(*after, *before);
    }

    #[tokio::test]
    async fn test_one_symbol_failure_does_not_abort_pass() {
        let manager = manager(6);
        let ops = RecorderOps {
            fail_tape_for: Some(Symbol::new("BAD")),
            ..Default::default()
        };

        let report = manager
            .apply_universe(&symbols(&["BAD", "GOOD"]), &ops)
            .await;

        assert_eq!(report.failures, 1);
        assert!(manager.record_for(&Symbol::new("BAD")).await.is_none());
        assert!(manager.record_for(&Symbol::new("GOOD")).await.is_some());
    }

    #[tokio::test]
    async fn test_clear_drops_records_and_channels() {
        let manager = manager(6);
        let ops = RecorderOps::default();

        manager.apply_universe(&symbols(&["AAPL"]), &ops).await;
        let record = manager.record_for(&Symbol::new("AAPL")).await.unwrap();
        let tape = record.tape_channel.unwrap();

        manager.clear().await;

        assert!(manager.record_for(&Symbol::new("AAPL")).await.is_none());
        assert!(manager.symbol_for_channel(tape).is_none());
        assert_eq!(manager.stats().await, SubscriptionStats::default());
    }
}
