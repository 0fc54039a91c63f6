use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of an order as published by the exchange.
///
/// `Buy` orders rest on the bid side, `Sell` orders on the ask side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Returns the opposite side.
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Exchange-assigned order identifier. Opaque and stable within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OrderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for OrderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decoded, sequenced feed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub sequence: u64,
    pub time: DateTime<Utc>,
    pub product_id: String,
    pub kind: EventKind,
}

/// Per-kind payload of a feed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    /// Order accepted by the matching engine. Not yet on the book.
    Received {
        side: Side,
        order_id: OrderId,
    },
    /// Order is now resting on the book.
    Open {
        side: Side,
        order_id: OrderId,
        price: Decimal,
        remaining_size: Decimal,
    },
    /// A trade. `side` is the side of the resting maker order.
    Match {
        side: Side,
        maker_order_id: OrderId,
        taker_order_id: OrderId,
        trade_id: u64,
        price: Decimal,
        size: Decimal,
    },
    /// Order is no longer on the book (filled or canceled).
    Done {
        side: Side,
        order_id: OrderId,
        reason: String,
        price: Option<Decimal>,
        remaining_size: Option<Decimal>,
    },
    /// Resting order size was reduced in place.
    Change {
        side: Side,
        order_id: OrderId,
        new_size: Decimal,
        price: Option<Decimal>,
    },
    /// Sequenced message of a type this system does not interpret.
    Unknown(String),
}

impl EventKind {
    /// Short name used in logs.
    pub fn name(&self) -> &str {
        match self {
            EventKind::Received { .. } => "received",
            EventKind::Open { .. } => "open",
            EventKind::Match { .. } => "match",
            EventKind::Done { .. } => "done",
            EventKind::Change { .. } => "change",
            EventKind::Unknown(kind) => kind,
        }
    }
}

/// One resting order as listed in a full-depth snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotOrder {
    pub order_id: OrderId,
    pub price: Decimal,
    pub size: Decimal,
}

/// Point-in-time full-depth book, tagged with the feed sequence it reflects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub sequence: u64,
    /// Bids in exchange priority order.
    pub bids: Vec<SnapshotOrder>,
    /// Asks in exchange priority order.
    pub asks: Vec<SnapshotOrder>,
}
