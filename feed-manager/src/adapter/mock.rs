//! Mock vendor session for tests and offline runs.
//!
//! Records every call the core makes, can be scripted to fail connects, and
//! optionally generates a deterministic synthetic feed for the channels the
//! core subscribes, so the full service can run without a vendor gateway.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use feed_common::data::{Symbol, Venue};

use super::traits::{ChannelId, MarketSession, SessionError, SessionEvent, SessionResult};

/// A recorded call against the mock session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCall {
    Connect {
        host: String,
        port: u16,
        client_id: i32,
    },
    Disconnect,
    SubscribeTape {
        channel: ChannelId,
        symbol: Symbol,
        venue: Venue,
    },
    CancelTape {
        channel: ChannelId,
    },
    SubscribeDepth {
        channel: ChannelId,
        symbol: Symbol,
        venue: Venue,
        rows: usize,
    },
    CancelDepth {
        channel: ChannelId,
    },
    SubscribeTick {
        channel: ChannelId,
        symbol: Symbol,
        venue: Venue,
    },
    CancelTick {
        channel: ChannelId,
    },
}

#[derive(Default)]
struct MockState {
    calls: Vec<SessionCall>,
    tape_channels: HashMap<ChannelId, Symbol>,
    depth_channels: HashMap<ChannelId, DepthChannel>,
    tick_channels: HashMap<ChannelId, Symbol>,
}

struct DepthChannel {
    rows: usize,
    /// Seeded (best bid, best ask); later deltas resize these levels in place
    top: Option<(Decimal, Decimal)>,
}

/// Scripted in-process `MarketSession`.
pub struct MockSession {
    connected: AtomicBool,
    next_id: AtomicI64,
    fail_connects: AtomicU32,
    events_tx: mpsc::Sender<SessionEvent>,
    state: Mutex<MockState>,
}

impl MockSession {
    /// Create a mock session and the event receiver the core will drain
    pub fn new() -> (Arc<Self>, mpsc::Receiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(1024);
        let session = Arc::new(Self {
            connected: AtomicBool::new(false),
            next_id: AtomicI64::new(1),
            fail_connects: AtomicU32::new(0),
            events_tx,
            state: Mutex::new(MockState::default()),
        });
        (session, events_rx)
    }

    /// Make the next `n` connect attempts fail
    pub fn fail_next_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Inject an event into the core's inbound queue
    pub async fn push_event(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event).await;
    }

    /// All calls recorded so far
    pub fn calls(&self) -> Vec<SessionCall> {
        self.state.lock().calls.clone()
    }

    /// Drain the recorded calls
    pub fn take_calls(&self) -> Vec<SessionCall> {
        std::mem::take(&mut self.state.lock().calls)
    }

    /// Channel id for the active tape subscription of `symbol`, if any
    pub fn tape_channel_for(&self, symbol: &Symbol) -> Option<ChannelId> {
        self.state
            .lock()
            .tape_channels
            .iter()
            .find(|(_, s)| *s == symbol)
            .map(|(ch, _)| *ch)
    }

    fn record(&self, call: SessionCall) {
        self.state.lock().calls.push(call);
    }

    fn ensure_connected(&self) -> SessionResult<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    /// Spawn a deterministic synthetic feed for the subscribed channels.
    ///
    /// Emits quotes on tape channels, trades on tick channels, and ladder
    /// deltas on depth channels until the shutdown signal fires. Prices
    /// follow a fixed wiggle so runs are reproducible.
    pub fn spawn_synthetic_feed(
        self: &Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(250));
            let mut seq: i64 = 0;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Synthetic feed stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        session.emit_synthetic(seq);
                        seq += 1;
                    }
                }
            }
        })
    }

    /// Non-blocking send; the synthetic feed drops events rather than
    /// stall behind a slow consumer
    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            debug!("Dropping synthetic event: {}", e);
        }
    }

    fn emit_synthetic(&self, seq: i64) {
        if !self.connected.load(Ordering::Acquire) {
            return;
        }

        let base = Decimal::from(100);
        let wiggle = Decimal::new(seq % 5, 2);
        let bid = base + wiggle;
        let ask = bid + Decimal::new(2, 2);

        let (tapes, depths, ticks) = {
            let mut state = self.state.lock();
            let tapes: Vec<ChannelId> = state.tape_channels.keys().copied().collect();
            let ticks: Vec<ChannelId> = state.tick_channels.keys().copied().collect();
            let mut depths = Vec::new();
            for (ch, depth) in state.depth_channels.iter_mut() {
                depths.push((*ch, depth.rows, depth.top));
                if depth.top.is_none() {
                    depth.top = Some((bid, ask));
                }
            }
            (tapes, depths, ticks)
        };

        for ch in tapes {
            self.emit(SessionEvent::Quote { channel: ch, field: 1, value: bid });
            self.emit(SessionEvent::Quote { channel: ch, field: 2, value: ask });
            if seq % 4 == 0 {
                self.emit(SessionEvent::Quote { channel: ch, field: 4, value: bid });
            }
        }

        for (ch, rows, top) in depths {
            match top {
                None => {
                    // First pass seeds a small ladder on both sides
                    for i in 0..rows.min(3) {
                        let offset = Decimal::new(i as i64, 2);
                        self.emit(SessionEvent::Depth {
                            channel: ch,
                            side: 1,
                            operation: 0,
                            price: bid - offset,
                            size: Decimal::from(10 + i as i64),
                            position: i,
                        });
                        self.emit(SessionEvent::Depth {
                            channel: ch,
                            side: 0,
                            operation: 0,
                            price: ask + offset,
                            size: Decimal::from(10 + i as i64),
                            position: i,
                        });
                    }
                }
                Some((top_bid, top_ask)) => {
                    // Resize the top level in place, alternating sides
                    self.emit(SessionEvent::Depth {
                        channel: ch,
                        side: (seq % 2) as i32,
                        operation: 1,
                        price: if seq % 2 == 1 { top_bid } else { top_ask },
                        size: Decimal::from(5 + seq % 20),
                        position: 0,
                    });
                }
            }
        }

        for ch in ticks {
            self.emit(SessionEvent::Trade {
                channel: ch,
                event_time: Utc::now(),
                price: bid + Decimal::new(1, 2),
                size: Decimal::from(1 + seq % 3),
            });
        }
    }
}

#[async_trait]
impl MarketSession for MockSession {
    async fn connect(&self, host: &str, port: u16, client_id: i32) -> SessionResult<()> {
        if self.fail_connects.load(Ordering::SeqCst) > 0 {
            self.fail_connects.fetch_sub(1, Ordering::SeqCst);
            return Err(SessionError::Connect(format!(
                "scripted connect failure to {}:{}",
                host, port
            )));
        }
        self.connected.store(true, Ordering::Release);
        self.record(SessionCall::Connect {
            host: host.to_string(),
            port,
            client_id,
        });
        debug!("Mock session connected to {}:{}", host, port);
        Ok(())
    }

    async fn disconnect(&self) -> SessionResult<()> {
        self.connected.store(false, Ordering::Release);
        self.record(SessionCall::Disconnect);
        let mut state = self.state.lock();
        state.tape_channels.clear();
        state.depth_channels.clear();
        state.tick_channels.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn next_channel_id(&self) -> ChannelId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn subscribe_tape(
        &self,
        channel: ChannelId,
        symbol: &Symbol,
        venue: &Venue,
    ) -> SessionResult<()> {
        self.ensure_connected()?;
        self.state
            .lock()
            .tape_channels
            .insert(channel, symbol.clone());
        self.record(SessionCall::SubscribeTape {
            channel,
            symbol: symbol.clone(),
            venue: venue.clone(),
        });
        Ok(())
    }

    async fn cancel_tape(&self, channel: ChannelId) -> SessionResult<()> {
        self.state.lock().tape_channels.remove(&channel);
        self.record(SessionCall::CancelTape { channel });
        Ok(())
    }

    async fn subscribe_depth(
        &self,
        channel: ChannelId,
        symbol: &Symbol,
        venue: &Venue,
        rows: usize,
    ) -> SessionResult<()> {
        self.ensure_connected()?;
        self.state
            .lock()
            .depth_channels
            .insert(channel, DepthChannel { rows, top: None });
        self.record(SessionCall::SubscribeDepth {
            channel,
            symbol: symbol.clone(),
            venue: venue.clone(),
            rows,
        });
        Ok(())
    }

    async fn cancel_depth(&self, channel: ChannelId) -> SessionResult<()> {
        self.state.lock().depth_channels.remove(&channel);
        self.record(SessionCall::CancelDepth { channel });
        Ok(())
    }

    async fn subscribe_tick_by_tick(
        &self,
        channel: ChannelId,
        symbol: &Symbol,
        venue: &Venue,
    ) -> SessionResult<()> {
        self.ensure_connected()?;
        self.state
            .lock()
            .tick_channels
            .insert(channel, symbol.clone());
        self.record(SessionCall::SubscribeTick {
            channel,
            symbol: symbol.clone(),
            venue: venue.clone(),
        });
        Ok(())
    }

    async fn cancel_tick_by_tick(&self, channel: ChannelId) -> SessionResult<()> {
        self.state.lock().tick_channels.remove(&channel);
        self.record(SessionCall::CancelTick { channel });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_connect_and_subscribe() {
        let (session, _events) = MockSession::new();
        assert!(!session.is_connected());

        session.connect("127.0.0.1", 4002, 7).await.unwrap();
        assert!(session.is_connected());

        let symbol = Symbol::new("AAPL");
        let ch = session.next_channel_id();
        session
            .subscribe_tape(ch, &symbol, &Venue::smart())
            .await
            .unwrap();

        assert_eq!(session.tape_channel_for(&symbol), Some(ch));
        let calls = session.calls();
        assert!(matches!(calls[0], SessionCall::Connect { port: 4002, .. }));
        assert!(
            matches!(&calls[1], SessionCall::SubscribeTape { channel, .. } if *channel == ch)
        );
    }

    #[tokio::test]
    async fn test_mock_requires_connection() {
        let (session, _events) = MockSession::new();
        let symbol = Symbol::new("AAPL");
        let result = session.subscribe_tape(1, &symbol, &Venue::smart()).await;
        assert!(matches!(result, Err(SessionError::NotConnected)));
    }

    #[tokio::test]
    async fn test_mock_scripted_connect_failures() {
        let (session, _events) = MockSession::new();
        session.fail_next_connects(2);

        assert!(session.connect("h", 1, 0).await.is_err());
        assert!(session.connect("h", 1, 0).await.is_err());
        assert!(session.connect("h", 1, 0).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_event_injection() {
        let (session, mut events) = MockSession::new();
        session
            .push_event(SessionEvent::Error {
                channel: 5,
                code: 10190,
                message: "limit reached".to_string(),
            })
            .await;

        match events.recv().await {
            Some(SessionEvent::Error { channel, code, .. }) => {
                assert_eq!(channel, 5);
                assert_eq!(code, 10190);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
