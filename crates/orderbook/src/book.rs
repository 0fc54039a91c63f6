//! Two-sided book with a bounded trade log.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use model::Side;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::side::{BookSide, LevelSummary, OrderBookSide};

/// Number of executions retained in the trade log.
pub const TRADE_LOG_CAPACITY: usize = 100;

/// An execution recorded in the trade log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trade {
    pub time: DateTime<Utc>,
    /// Side of the aggressing (taker) order.
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
}

/// Local mirror of the exchange book for one instrument.
#[derive(Debug, Clone)]
pub struct Book {
    bids: OrderBookSide,
    asks: OrderBookSide,
    /// Most recent trade first.
    matches: VecDeque<Trade>,
}

impl Default for Book {
    fn default() -> Self {
        Self::new()
    }
}

impl Book {
    /// Creates an empty book.
    pub fn new() -> Self {
        Self {
            bids: OrderBookSide::new(BookSide::Bid),
            asks: OrderBookSide::new(BookSide::Ask),
            matches: VecDeque::with_capacity(TRADE_LOG_CAPACITY),
        }
    }

    pub fn bids(&self) -> &OrderBookSide {
        &self.bids
    }

    pub fn asks(&self) -> &OrderBookSide {
        &self.asks
    }

    /// The side that holds resting orders of the given order side.
    pub fn side(&self, side: Side) -> &OrderBookSide {
        match BookSide::from(side) {
            BookSide::Bid => &self.bids,
            BookSide::Ask => &self.asks,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut OrderBookSide {
        match BookSide::from(side) {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        }
    }

    /// Pushes an execution to the front of the log, evicting the oldest
    /// entry once capacity is exceeded.
    pub fn record_trade(&mut self, time: DateTime<Utc>, side: Side, size: Decimal, price: Decimal) {
        if self.matches.len() == TRADE_LOG_CAPACITY {
            self.matches.pop_back();
        }
        self.matches.push_front(Trade {
            time,
            side,
            size,
            price,
        });
    }

    /// Recent trades, most recent first.
    pub fn trades(&self) -> impl Iterator<Item = &Trade> + '_ {
        self.matches.iter()
    }

    pub fn last_trade(&self) -> Option<&Trade> {
        self.matches.front()
    }

    pub fn best_bid(&self) -> Option<LevelSummary> {
        self.bids.best().map(LevelSummary::from)
    }

    pub fn best_ask(&self) -> Option<LevelSummary> {
        self.asks.best().map(LevelSummary::from)
    }

    /// Returns the mid price (average of best bid and best ask).
    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.bids.best_price()?;
        let ask = self.asks.best_price()?;
        Some((bid + ask) / Decimal::TWO)
    }

    /// Returns the spread (best ask - best bid).
    pub fn spread(&self) -> Option<Decimal> {
        let bid = self.bids.best_price()?;
        let ask = self.asks.best_price()?;
        Some(ask - bid)
    }

    /// Copies the top `depth` levels per side and the trade log.
    pub fn summary(&self, depth: usize) -> BookSummary {
        BookSummary {
            bids: self.bids.top_levels(depth),
            asks: self.asks.top_levels(depth),
            trades: self.matches.iter().cloned().collect(),
            bid_orders: self.bids.order_count(),
            ask_orders: self.asks.order_count(),
        }
    }

    /// Checks both sides for index/level agreement.
    pub fn is_consistent(&self) -> bool {
        self.bids.is_consistent() && self.asks.is_consistent()
    }
}

/// Owned copy of book state for readers outside the event path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSummary {
    /// Best first.
    pub bids: Vec<LevelSummary>,
    /// Best first.
    pub asks: Vec<LevelSummary>,
    /// Most recent first.
    pub trades: Vec<Trade>,
    pub bid_orders: usize,
    pub ask_orders: usize,
}

/// Handle shared between the event-application path and readers.
///
/// The writer holds the lock for one event at a time, so readers never
/// observe a book mid-mutation.
pub type SharedBook = Arc<RwLock<Book>>;

pub fn create_shared_book() -> SharedBook {
    Arc::new(RwLock::new(Book::new()))
}
