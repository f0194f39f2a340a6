//! Per-symbol book registry.
//!
//! Owns the symbol→`OrderBook` map. Each book sits behind its own mutex so
//! interleaved tape/depth/tick callbacks for one symbol are serialized while
//! distinct symbols mutate concurrently. The registry is cleared wholesale
//! on disconnect because channel ids do not survive a session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use feed_common::data::{BookSnapshot, OrderBook, Symbol};

/// Registry of live order books, one per subscribed symbol.
pub struct BookRegistry {
    books: DashMap<Symbol, Arc<Mutex<OrderBook>>>,
    max_rows: usize,
    tape_capacity: usize,
}

impl BookRegistry {
    pub fn new(max_rows: usize, tape_capacity: usize) -> Self {
        Self {
            books: DashMap::new(),
            max_rows,
            tape_capacity,
        }
    }

    /// Get the book for `symbol`, creating it on first subscribe
    pub fn ensure(&self, symbol: &Symbol) -> Arc<Mutex<OrderBook>> {
        self.books
            .entry(symbol.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(OrderBook::new(
                    symbol.clone(),
                    self.max_rows,
                    self.tape_capacity,
                )))
            })
            .clone()
    }

    /// Drop the book for an unsubscribed symbol
    pub fn remove(&self, symbol: &Symbol) {
        self.books.remove(symbol);
    }

    /// Run `f` against the symbol's book under its lock.
    ///
    /// Returns `None` when no book exists (already unsubscribed). `f` must
    /// not block; it runs on the event-dispatch hot path.
    pub fn with_book<R>(&self, symbol: &Symbol, f: impl FnOnce(&mut OrderBook) -> R) -> Option<R> {
        let book = self.books.get(symbol)?.clone();
        let mut guard = book.lock();
        Some(f(&mut guard))
    }

    /// Receipt time of the most recent trade activity for `symbol`
    pub fn last_trade_at(&self, symbol: &Symbol) -> Option<DateTime<Utc>> {
        self.with_book(symbol, |book| book.last_trade_at()).flatten()
    }

    /// Snapshot a single book
    pub fn snapshot(&self, symbol: &Symbol, now: DateTime<Utc>) -> Option<BookSnapshot> {
        self.with_book(symbol, |book| book.snapshot(now))
    }

    /// Snapshot every live book
    pub fn snapshots(&self, now: DateTime<Utc>) -> Vec<BookSnapshot> {
        self.books
            .iter()
            .map(|entry| entry.value().lock().snapshot(now))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// Drop all books (disconnect path)
    pub fn clear(&self) {
        self.books.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_common::data::{QuoteField, TradePrint};
    use rust_decimal_macros::dec;

    #[test]
    fn test_ensure_is_idempotent() {
        let registry = BookRegistry::new(10, 64);
        let symbol = Symbol::new("AAPL");

        let a = registry.ensure(&symbol);
        let b = registry.ensure(&symbol);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_with_book_and_remove() {
        let registry = BookRegistry::new(10, 64);
        let symbol = Symbol::new("MSFT");
        registry.ensure(&symbol);

        let now = Utc::now();
        registry
            .with_book(&symbol, |book| {
                book.apply_quote(QuoteField::BidPrice, dec!(100), now);
            })
            .unwrap();
        assert_eq!(
            registry.snapshot(&symbol, now).unwrap().best_bid,
            Some(dec!(100))
        );

        registry.remove(&symbol);
        assert!(registry.with_book(&symbol, |_| ()).is_none());
    }

    #[test]
    fn test_last_trade_at() {
        let registry = BookRegistry::new(10, 64);
        let symbol = Symbol::new("SPY");
        registry.ensure(&symbol);
        assert_eq!(registry.last_trade_at(&symbol), None);

        let now = Utc::now();
        registry
            .with_book(&symbol, |book| {
                book.record_trade(TradePrint::new(now, now, dec!(10), dec!(1)));
            })
            .unwrap();
        assert_eq!(registry.last_trade_at(&symbol), Some(now));
    }

    #[test]
    fn test_clear() {
        let registry = BookRegistry::new(10, 64);
        registry.ensure(&Symbol::new("A"));
        registry.ensure(&Symbol::new("B"));
        assert_eq!(registry.len(), 2);

        registry.clear();
        assert!(registry.is_empty());
    }
}
