//! Reconstructed order-book state for a single instrument.
//!
//! The book is rebuilt from positional wire deltas: each depth update
//! addresses a rank slot (0 = best) on one side, and the ladder is kept
//! sorted (bids descending, asks ascending) with unique prices and at most
//! the configured number of rows per side. Alongside the ladder the book
//! carries top-of-book quote state fed by the tape channel, a bounded trade
//! tape fed by the tick-by-tick channel, and per-channel receipt clocks used
//! for staleness and venue-fallback decisions.
//!
//! Updates that cannot be applied safely — an out-of-range rank, a price
//! that would break side ordering, an undefined wire enum — are dropped and
//! reported to the caller; the book is never left half-mutated.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

use super::symbol::Symbol;

/// Minimum configurable depth rows per side
pub const MIN_DEPTH_ROWS: usize = 1;
/// Maximum configurable depth rows per side
pub const MAX_DEPTH_ROWS: usize = 10;
/// Default bounded trade-tape capacity
pub const DEFAULT_TAPE_CAPACITY: usize = 256;

/// Decode failure for a wire-level enum field
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireDecodeError {
    #[error("undefined book side: {0}")]
    Side(i32),

    #[error("undefined depth operation: {0}")]
    Operation(i32),

    #[error("undefined quote field: {0}")]
    QuoteField(i32),
}

/// Side of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookSide {
    /// Bid side (buyers), sorted descending by price
    Bid,
    /// Ask side (sellers), sorted ascending by price
    Ask,
}

impl BookSide {
    /// Decode from the vendor wire encoding (0 = ask, 1 = bid)
    pub fn from_wire(value: i32) -> Result<Self, WireDecodeError> {
        match value {
            0 => Ok(BookSide::Ask),
            1 => Ok(BookSide::Bid),
            other => Err(WireDecodeError::Side(other)),
        }
    }
}

impl fmt::Display for BookSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookSide::Bid => write!(f, "BID"),
            BookSide::Ask => write!(f, "ASK"),
        }
    }
}

/// Positional mutation applied to one side of the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepthOperation {
    /// Create a new level at the rank, shifting lower ranks down
    Insert,
    /// Replace price/size at the rank
    Update,
    /// Remove the level at the rank, compacting lower ranks up
    Delete,
}

impl DepthOperation {
    /// Decode from the vendor wire encoding (0 = insert, 1 = update, 2 = delete)
    pub fn from_wire(value: i32) -> Result<Self, WireDecodeError> {
        match value {
            0 => Ok(DepthOperation::Insert),
            1 => Ok(DepthOperation::Update),
            2 => Ok(DepthOperation::Delete),
            other => Err(WireDecodeError::Operation(other)),
        }
    }
}

impl fmt::Display for DepthOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepthOperation::Insert => write!(f, "INSERT"),
            DepthOperation::Update => write!(f, "UPDATE"),
            DepthOperation::Delete => write!(f, "DELETE"),
        }
    }
}

/// Top-of-book quote field delivered on the tape channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuoteField {
    BidSize,
    BidPrice,
    AskPrice,
    AskSize,
    LastPrice,
    LastSize,
}

impl QuoteField {
    /// Decode from the vendor tick-type encoding
    pub fn from_wire(value: i32) -> Result<Self, WireDecodeError> {
        match value {
            0 => Ok(QuoteField::BidSize),
            1 => Ok(QuoteField::BidPrice),
            2 => Ok(QuoteField::AskPrice),
            3 => Ok(QuoteField::AskSize),
            4 => Ok(QuoteField::LastPrice),
            5 => Ok(QuoteField::LastSize),
            other => Err(WireDecodeError::QuoteField(other)),
        }
    }
}

/// A single decoded depth delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthUpdate {
    /// Side being mutated
    pub side: BookSide,
    /// Positional operation
    pub operation: DepthOperation,
    /// Price at the addressed rank
    pub price: Decimal,
    /// Size at the addressed rank
    pub size: Decimal,
    /// Rank slot, 0 = best
    pub position: usize,
    /// Local receipt timestamp
    pub ts: DateTime<Utc>,
}

impl DepthUpdate {
    pub fn new(
        side: BookSide,
        operation: DepthOperation,
        price: Decimal,
        size: Decimal,
        position: usize,
        ts: DateTime<Utc>,
    ) -> Self {
        Self {
            side,
            operation,
            price,
            size,
            position,
            ts,
        }
    }
}

/// A single trade print from the tick-by-tick channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePrint {
    /// Exchange event timestamp
    pub event_time: DateTime<Utc>,
    /// Local receipt timestamp
    pub receipt_time: DateTime<Utc>,
    pub price: Decimal,
    pub size: Decimal,
}

impl TradePrint {
    pub fn new(
        event_time: DateTime<Utc>,
        receipt_time: DateTime<Utc>,
        price: Decimal,
        size: Decimal,
    ) -> Self {
        Self {
            event_time,
            receipt_time,
            price,
            size,
        }
    }
}

/// A single price level in the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl BookLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

impl fmt::Display for BookLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.size, self.price)
    }
}

/// Result of applying one depth delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthOutcome {
    /// Mutation applied, derived fields refreshed
    Applied,
    /// Rank outside the current side or the configured row cap; dropped
    OutOfRange,
    /// Price would break side ordering or duplicate a level; dropped
    OrderingViolation,
}

/// Verdict of a book validity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookValidity {
    Valid,
    /// One side has no price from either the ladder or the quote
    EmptySide(BookSide),
    /// Best bid at or above best ask
    Crossed { bid: Decimal, ask: Decimal },
    /// No channel produced data within the staleness window
    Stale { last_update: Option<DateTime<Utc>> },
}

impl BookValidity {
    pub fn is_valid(&self) -> bool {
        matches!(self, BookValidity::Valid)
    }
}

impl fmt::Display for BookValidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookValidity::Valid => write!(f, "valid"),
            BookValidity::EmptySide(side) => write!(f, "empty {} side", side),
            BookValidity::Crossed { bid, ask } => write!(f, "crossed ({} >= {})", bid, ask),
            BookValidity::Stale { last_update: Some(ts) } => write!(f, "stale (last update {})", ts),
            BookValidity::Stale { last_update: None } => write!(f, "stale (no data received)"),
        }
    }
}

/// Top-of-book quote state fed by the tape channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct TopOfBook {
    bid_price: Option<Decimal>,
    ask_price: Option<Decimal>,
    bid_size: Option<Decimal>,
    ask_size: Option<Decimal>,
    last_price: Option<Decimal>,
    last_size: Option<Decimal>,
}

/// Last-receipt timestamps per subscription channel.
#[derive(Debug, Clone, Copy, Default)]
struct ChannelClocks {
    l1: Option<DateTime<Utc>>,
    depth: Option<DateTime<Utc>>,
    tick: Option<DateTime<Utc>>,
}

impl ChannelClocks {
    fn freshest(&self) -> Option<DateTime<Utc>> {
        [self.l1, self.depth, self.tick].into_iter().flatten().max()
    }
}

/// Derived fields recomputed after every mutation.
#[derive(Debug, Clone, Copy, Default)]
struct BookSummary {
    best_bid: Option<Decimal>,
    best_ask: Option<Decimal>,
    spread: Option<Decimal>,
    bid_depth_size: Decimal,
    ask_depth_size: Decimal,
}

/// Read-only view exposed to downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub symbol: Symbol,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub spread: Option<Decimal>,
    pub bid_rows: usize,
    pub ask_rows: usize,
    pub bid_depth_size: Decimal,
    pub ask_depth_size: Decimal,
    pub last_price: Option<Decimal>,
    pub recent_trades: usize,
    pub l1_age_ms: Option<i64>,
    pub depth_age_ms: Option<i64>,
    pub tick_age_ms: Option<i64>,
}

/// Per-symbol reconstructed book.
///
/// All mutating methods must be serialized per instance (the registry wraps
/// each book in its own mutex); distinct symbols mutate independently.
#[derive(Debug, Clone)]
pub struct OrderBook {
    symbol: Symbol,
    max_rows: usize,
    bids: Vec<BookLevel>,
    asks: Vec<BookLevel>,
    quote: TopOfBook,
    tape: VecDeque<TradePrint>,
    tape_capacity: usize,
    summary: BookSummary,
    clocks: ChannelClocks,
    last_trade_at: Option<DateTime<Utc>>,
}

impl OrderBook {
    /// Create an empty book; `max_rows` is clamped to the supported range.
    pub fn new(symbol: Symbol, max_rows: usize, tape_capacity: usize) -> Self {
        let max_rows = max_rows.clamp(MIN_DEPTH_ROWS, MAX_DEPTH_ROWS);
        Self {
            symbol,
            max_rows,
            bids: Vec::with_capacity(max_rows),
            asks: Vec::with_capacity(max_rows),
            quote: TopOfBook::default(),
            tape: VecDeque::with_capacity(tape_capacity.max(1)),
            tape_capacity: tape_capacity.max(1),
            summary: BookSummary::default(),
            clocks: ChannelClocks::default(),
            last_trade_at: None,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Apply one positional depth delta.
    ///
    /// Out-of-range ranks and mutations that would break side ordering are
    /// dropped; the outcome tells the caller which. The depth receipt clock
    /// advances on every delivery, applied or not.
    pub fn apply_depth(&mut self, update: &DepthUpdate) -> DepthOutcome {
        self.clocks.depth = Some(update.ts);

        let max_rows = self.max_rows;
        let levels = match update.side {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        };
        let pos = update.position;

        let outcome = match update.operation {
            DepthOperation::Insert => {
                if pos >= max_rows || pos > levels.len() {
                    DepthOutcome::OutOfRange
                } else if !fits_between(
                    update.side,
                    pos.checked_sub(1).and_then(|i| levels.get(i)),
                    levels.get(pos),
                    update.price,
                ) {
                    DepthOutcome::OrderingViolation
                } else {
                    levels.insert(pos, BookLevel::new(update.price, update.size));
                    levels.truncate(max_rows);
                    DepthOutcome::Applied
                }
            }
            DepthOperation::Update => {
                if pos >= levels.len() {
                    DepthOutcome::OutOfRange
                } else if !fits_between(
                    update.side,
                    pos.checked_sub(1).and_then(|i| levels.get(i)),
                    levels.get(pos + 1),
                    update.price,
                ) {
                    DepthOutcome::OrderingViolation
                } else {
                    levels[pos] = BookLevel::new(update.price, update.size);
                    DepthOutcome::Applied
                }
            }
            DepthOperation::Delete => {
                if pos >= levels.len() {
                    DepthOutcome::OutOfRange
                } else {
                    levels.remove(pos);
                    DepthOutcome::Applied
                }
            }
        };

        if outcome == DepthOutcome::Applied {
            self.refresh_summary();
        }
        outcome
    }

    /// Append a trade print to the bounded tape.
    pub fn record_trade(&mut self, print: TradePrint) {
        self.clocks.tick = Some(print.receipt_time);
        self.last_trade_at = Some(print.receipt_time);
        if self.tape.len() == self.tape_capacity {
            self.tape.pop_front();
        }
        self.tape.push_back(print);
    }

    /// Apply a top-of-book quote field from the tape channel.
    ///
    /// A last-trade price on the tape also counts as trade activity for
    /// venue-fallback purposes.
    pub fn apply_quote(&mut self, field: QuoteField, value: Decimal, ts: DateTime<Utc>) {
        self.clocks.l1 = Some(ts);
        match field {
            QuoteField::BidPrice => self.quote.bid_price = Some(value),
            QuoteField::AskPrice => self.quote.ask_price = Some(value),
            QuoteField::BidSize => self.quote.bid_size = Some(value),
            QuoteField::AskSize => self.quote.ask_size = Some(value),
            QuoteField::LastPrice => {
                self.quote.last_price = Some(value);
                self.last_trade_at = Some(ts);
            }
            QuoteField::LastSize => self.quote.last_size = Some(value),
        }
        self.refresh_summary();
    }

    /// Best bid: top ladder row when depth is streaming, else the L1 quote.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.summary.best_bid
    }

    /// Best ask: top ladder row when depth is streaming, else the L1 quote.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.summary.best_ask
    }

    pub fn spread(&self) -> Option<Decimal> {
        self.summary.spread
    }

    pub fn bids(&self) -> &[BookLevel] {
        &self.bids
    }

    pub fn asks(&self) -> &[BookLevel] {
        &self.asks
    }

    /// True when best bid is at or above best ask
    pub fn is_crossed(&self) -> bool {
        match (self.summary.best_bid, self.summary.best_ask) {
            (Some(bid), Some(ask)) => bid >= ask,
            _ => false,
        }
    }

    /// Receipt time of the most recent trade activity (tick print or tape
    /// last-price), used by the venue fallback monitor.
    pub fn last_trade_at(&self) -> Option<DateTime<Utc>> {
        self.last_trade_at
    }

    /// Number of prints currently held in the bounded tape
    pub fn recent_trade_count(&self) -> usize {
        self.tape.len()
    }

    /// Most recent prints, newest last
    pub fn recent_trades(&self) -> impl Iterator<Item = &TradePrint> {
        self.tape.iter()
    }

    /// Check the book against the validity rules.
    ///
    /// A book is valid only when both sides have a price, best bid is below
    /// best ask, and at least one channel produced data within `staleness`.
    pub fn validity(&self, now: DateTime<Utc>, staleness: Duration) -> BookValidity {
        let bid = match self.summary.best_bid {
            Some(p) => p,
            None => return BookValidity::EmptySide(BookSide::Bid),
        };
        let ask = match self.summary.best_ask {
            Some(p) => p,
            None => return BookValidity::EmptySide(BookSide::Ask),
        };
        if bid >= ask {
            return BookValidity::Crossed { bid, ask };
        }
        match self.clocks.freshest() {
            Some(last) if now - last <= staleness => BookValidity::Valid,
            last_update => BookValidity::Stale { last_update },
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        self.validity(now, staleness).is_valid()
    }

    /// Read-only snapshot for heartbeat logging and downstream consumers
    pub fn snapshot(&self, now: DateTime<Utc>) -> BookSnapshot {
        BookSnapshot {
            symbol: self.symbol.clone(),
            best_bid: self.summary.best_bid,
            best_ask: self.summary.best_ask,
            spread: self.summary.spread,
            bid_rows: self.bids.len(),
            ask_rows: self.asks.len(),
            bid_depth_size: self.summary.bid_depth_size,
            ask_depth_size: self.summary.ask_depth_size,
            last_price: self.quote.last_price,
            recent_trades: self.tape.len(),
            l1_age_ms: age_ms(now, self.clocks.l1),
            depth_age_ms: age_ms(now, self.clocks.depth),
            tick_age_ms: age_ms(now, self.clocks.tick),
        }
    }

    fn refresh_summary(&mut self) {
        let best_bid = self.bids.first().map(|l| l.price).or(self.quote.bid_price);
        let best_ask = self.asks.first().map(|l| l.price).or(self.quote.ask_price);
        self.summary = BookSummary {
            best_bid,
            best_ask,
            spread: match (best_bid, best_ask) {
                (Some(bid), Some(ask)) => Some(ask - bid),
                _ => None,
            },
            bid_depth_size: self.bids.iter().map(|l| l.size).sum(),
            ask_depth_size: self.asks.iter().map(|l| l.size).sum(),
        };
    }
}

/// True when `price` sits strictly between its neighbors for the side's
/// ordering; strict comparison also rules out duplicate prices.
fn fits_between(
    side: BookSide,
    above: Option<&BookLevel>,
    below: Option<&BookLevel>,
    price: Decimal,
) -> bool {
    let above_ok = match (side, above) {
        (BookSide::Bid, Some(level)) => level.price > price,
        (BookSide::Ask, Some(level)) => level.price < price,
        (_, None) => true,
    };
    let below_ok = match (side, below) {
        (BookSide::Bid, Some(level)) => price > level.price,
        (BookSide::Ask, Some(level)) => price < level.price,
        (_, None) => true,
    };
    above_ok && below_ok
}

fn age_ms(now: DateTime<Utc>, ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| (now - t).num_milliseconds())
}

impl fmt::Display for OrderBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "OrderBook {}", self.symbol)?;
        writeln!(f, "  Asks ({}):", self.asks.len())?;
        for level in self.asks.iter().take(5).rev() {
            writeln!(f, "    {}", level)?;
        }
        if let Some(spread) = self.summary.spread {
            writeln!(f, "  --- spread: {} ---", spread)?;
        }
        writeln!(f, "  Bids ({}):", self.bids.len())?;
        for level in self.bids.iter().take(5) {
            writeln!(f, "    {}", level)?;
        }
        Ok(())
    }
}
