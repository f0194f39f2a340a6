//! Connection supervision.
//!
//! Owns the session lifecycle: initial connect, teardown, and the reconnect
//! sequence after a transport failure. Reconnects are single-flight (a
//! second trigger folds into the in-flight attempt), use exponential
//! backoff, and finish with a best-effort resubscription of every symbol
//! that was active before the disconnect. All session-scoped state (channel
//! maps, records, books) is cleared the moment the session drops, because
//! vendor channel ids do not survive it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

use crate::adapter::{MarketSession, SessionError, SessionResult};
use crate::books::BookRegistry;
use crate::config::{ReconnectSettings, SessionSettings};
use crate::subscription::{SubscriptionManager, SubscriptionOps};

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect attempts exhausted
    Failed,
}

/// Observable connection state for heartbeat reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    /// Reconnect attempt counter, 0 outside a reconnect sequence
    pub attempt: u32,
    /// Backoff delay chosen for the current attempt
    pub next_delay: Option<Duration>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            attempt: 0,
            next_delay: None,
        }
    }
}

/// Exponential backoff schedule for reconnect attempts.
///
/// Delay doubles per attempt starting at `base_delay`, capped at
/// `max_delay`; `next_delay` returns `None` once attempts are exhausted.
#[derive(Debug)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            attempt: 0,
        }
    }

    pub fn from_settings(settings: &ReconnectSettings) -> Self {
        Self::new(
            settings.max_attempts,
            settings.base_delay(),
            settings.max_delay(),
        )
    }

    /// Delay for the next attempt, or `None` when attempts are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32 << self.attempt.min(20);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        self.attempt += 1;
        Some(delay)
    }

    /// Attempts consumed so far
    pub fn attempts_made(&self) -> u32 {
        self.attempt
    }

    pub fn has_attempts_remaining(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Reset after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Outcome of a reconnect sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectReport {
    /// Symbols holding a subscription again after resubscription
    pub recovered: usize,
    /// Symbols that were active before the disconnect
    pub total: usize,
}

/// Connect/disconnect/reconnect state machine for the vendor session.
pub struct ConnectionSupervisor {
    session: Arc<dyn MarketSession>,
    manager: Arc<SubscriptionManager>,
    books: Arc<BookRegistry>,
    endpoint: SessionSettings,
    reconnect: ReconnectSettings,
    state: Mutex<ConnectionState>,
    /// Single-flight gate: concurrent reconnect triggers fold into one
    gate: AsyncMutex<()>,
}

impl ConnectionSupervisor {
    pub fn new(
        session: Arc<dyn MarketSession>,
        manager: Arc<SubscriptionManager>,
        books: Arc<BookRegistry>,
        endpoint: SessionSettings,
        reconnect: ReconnectSettings,
    ) -> Self {
        Self {
            session,
            manager,
            books,
            endpoint,
            reconnect,
            state: Mutex::new(ConnectionState::default()),
            gate: AsyncMutex::new(()),
        }
    }

    /// Current observable state
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, phase: ConnectionPhase, attempt: u32, next_delay: Option<Duration>) {
        *self.state.lock() = ConnectionState {
            phase,
            attempt,
            next_delay,
        };
    }

    /// Establish the initial session.
    pub async fn connect(&self) -> SessionResult<()> {
        self.set_state(ConnectionPhase::Connecting, 0, None);
        match self
            .session
            .connect(&self.endpoint.host, self.endpoint.port, self.endpoint.client_id)
            .await
        {
            Ok(()) => {
                self.set_state(ConnectionPhase::Connected, 0, None);
                info!(
                    "Session connected to {}:{} (client {})",
                    self.endpoint.host, self.endpoint.port, self.endpoint.client_id
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionPhase::Disconnected, 0, None);
                Err(e)
            }
        }
    }

    /// Planned teardown: drop the wire and clear session-scoped state.
    pub async fn shutdown(&self) {
        let _ = self.session.disconnect().await;
        self.manager.clear().await;
        self.books.clear();
        self.set_state(ConnectionPhase::Disconnected, 0, None);
        info!("Session disconnected");
    }

    /// React to a transport failure: clear state, reconnect with backoff,
    /// then best-effort resubscribe what was active.
    ///
    /// Returns `Ok(None)` when another reconnect was already in flight or
    /// shutdown fired mid-sequence.
    pub async fn handle_disconnect(
        &self,
        ops: &dyn SubscriptionOps,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> SessionResult<Option<ReconnectReport>> {
        let _guard = match self.gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Reconnect already in flight; folding request");
                return Ok(None);
            }
        };

        // Channel ids are dead with the session; capture the active set and
        // wipe everything before dialing out again
        let previous = self.manager.active_symbols().await;
        self.manager.clear().await;
        self.books.clear();
        let _ = self.session.disconnect().await;

        let mut policy = ReconnectPolicy::from_settings(&self.reconnect);
        loop {
            let Some(delay) = policy.next_delay() else {
                self.set_state(ConnectionPhase::Failed, policy.attempts_made(), None);
                error!(
                    "Reconnect failed after {} attempts; giving up",
                    self.reconnect.max_attempts
                );
                return Err(SessionError::Connect(format!(
                    "gave up after {} attempts",
                    self.reconnect.max_attempts
                )));
            };
            let attempt = policy.attempts_made();
            self.set_state(ConnectionPhase::Reconnecting, attempt, Some(delay));

            info!(
                "Reconnect attempt {}/{} in {:?}",
                attempt, self.reconnect.max_attempts, delay
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => {
                    info!("Shutdown during reconnect backoff");
                    self.set_state(ConnectionPhase::Disconnected, 0, None);
                    return Ok(None);
                }
            }

            match self
                .session
                .connect(&self.endpoint.host, self.endpoint.port, self.endpoint.client_id)
                .await
            {
                Ok(()) => {
                    self.set_state(ConnectionPhase::Connected, 0, None);
                    let total = previous.len();
                    self.manager.apply_universe(&previous, ops).await;
                    let recovered = self.manager.active_symbols().await.len();
                    if recovered < total {
                        warn!(
                            "Resubscription recovered {}/{} symbols",
                            recovered, total
                        );
                    } else {
                        info!("Reconnected; recovered {}/{} subscriptions", recovered, total);
                    }
                    return Ok(Some(ReconnectReport { recovered, total }));
                }
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}", attempt, e);
                }
            }
        }
    }
}
