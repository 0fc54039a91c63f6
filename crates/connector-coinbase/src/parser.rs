use chrono::{DateTime, Utc};
use model::{EventKind, FeedEvent, OrderId, Side};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Raw `received` message.
#[derive(Debug, Deserialize)]
pub struct ReceivedRaw {
    pub sequence: u64,
    pub time: DateTime<Utc>,
    pub product_id: String,
    pub order_id: OrderId,
    pub side: Side,
}

/// Raw `open` message.
#[derive(Debug, Deserialize)]
pub struct OpenRaw {
    pub sequence: u64,
    pub time: DateTime<Utc>,
    pub product_id: String,
    pub order_id: OrderId,
    pub side: Side,
    pub price: Decimal,
    pub remaining_size: Decimal,
}

/// Raw `match` message. `side` is the maker order's side.
#[derive(Debug, Deserialize)]
pub struct MatchRaw {
    pub sequence: u64,
    pub time: DateTime<Utc>,
    pub product_id: String,
    pub trade_id: u64,
    pub maker_order_id: OrderId,
    pub taker_order_id: OrderId,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
}

/// Raw `done` message. Market orders carry no price or remaining size.
#[derive(Debug, Deserialize)]
pub struct DoneRaw {
    pub sequence: u64,
    pub time: DateTime<Utc>,
    pub product_id: String,
    pub order_id: OrderId,
    pub side: Side,
    pub reason: String,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub remaining_size: Option<Decimal>,
}

/// Raw `change` message.
#[derive(Debug, Deserialize)]
pub struct ChangeRaw {
    pub sequence: u64,
    pub time: DateTime<Utc>,
    pub product_id: String,
    pub order_id: OrderId,
    pub side: Side,
    pub new_size: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
}

/// Minimal fields of a sequenced message of any other type.
#[derive(Debug, Deserialize)]
struct SequencedRaw {
    sequence: u64,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    #[serde(default)]
    product_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorRaw {
    message: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum ParsedMessage {
    /// A sequenced book event.
    Event(FeedEvent),
    /// Subscription acknowledgement.
    Subscriptions,
    /// Error published by the exchange.
    Error(String),
    /// Unsequenced message of no interest (heartbeat, status, ...).
    Unknown,
}

impl From<ReceivedRaw> for FeedEvent {
    fn from(raw: ReceivedRaw) -> Self {
        FeedEvent {
            sequence: raw.sequence,
            time: raw.time,
            product_id: raw.product_id,
            kind: EventKind::Received {
                side: raw.side,
                order_id: raw.order_id,
            },
        }
    }
}

impl From<OpenRaw> for FeedEvent {
    fn from(raw: OpenRaw) -> Self {
        FeedEvent {
            sequence: raw.sequence,
            time: raw.time,
            product_id: raw.product_id,
            kind: EventKind::Open {
                side: raw.side,
                order_id: raw.order_id,
                price: raw.price,
                remaining_size: raw.remaining_size,
            },
        }
    }
}

impl From<MatchRaw> for FeedEvent {
    fn from(raw: MatchRaw) -> Self {
        FeedEvent {
            sequence: raw.sequence,
            time: raw.time,
            product_id: raw.product_id,
            kind: EventKind::Match {
                side: raw.side,
                maker_order_id: raw.maker_order_id,
                taker_order_id: raw.taker_order_id,
                trade_id: raw.trade_id,
                price: raw.price,
                size: raw.size,
            },
        }
    }
}

impl From<DoneRaw> for FeedEvent {
    fn from(raw: DoneRaw) -> Self {
        FeedEvent {
            sequence: raw.sequence,
            time: raw.time,
            product_id: raw.product_id,
            kind: EventKind::Done {
                side: raw.side,
                order_id: raw.order_id,
                reason: raw.reason,
                price: raw.price,
                remaining_size: raw.remaining_size,
            },
        }
    }
}

impl From<ChangeRaw> for FeedEvent {
    fn from(raw: ChangeRaw) -> Self {
        FeedEvent {
            sequence: raw.sequence,
            time: raw.time,
            product_id: raw.product_id,
            kind: EventKind::Change {
                side: raw.side,
                order_id: raw.order_id,
                new_size: raw.new_size,
                price: raw.price,
            },
        }
    }
}

/// Build the subscribe request for the full (level 3) channel.
pub fn subscribe_message(product_id: &str) -> String {
    serde_json::json!({
        "type": "subscribe",
        "product_ids": [product_id],
        "channels": ["full"],
    })
    .to_string()
}

pub fn parse_message(text: &str) -> Result<ParsedMessage, serde_json::Error> {
    let raw: serde_json::Value = serde_json::from_str(text)?;
    let Some(message_type) = raw.get("type").and_then(|v| v.as_str()) else {
        return Ok(ParsedMessage::Unknown);
    };

    let event: FeedEvent = match message_type {
        "received" => serde_json::from_value::<ReceivedRaw>(raw)?.into(),
        "open" => serde_json::from_value::<OpenRaw>(raw)?.into(),
        "match" => serde_json::from_value::<MatchRaw>(raw)?.into(),
        "done" => serde_json::from_value::<DoneRaw>(raw)?.into(),
        "change" => serde_json::from_value::<ChangeRaw>(raw)?.into(),
        "subscriptions" => return Ok(ParsedMessage::Subscriptions),
        "error" => {
            let err: ErrorRaw = serde_json::from_value(raw)?;
            let message = match err.reason {
                Some(reason) => format!("{}: {}", err.message, reason),
                None => err.message,
            };
            return Ok(ParsedMessage::Error(message));
        }
        other => {
            // Anything sequenced still occupies a slot in the sequence.
            if raw.get("sequence").is_none() {
                return Ok(ParsedMessage::Unknown);
            }
            let kind = EventKind::Unknown(other.to_string());
            let seq: SequencedRaw = serde_json::from_value(raw)?;
            FeedEvent {
                sequence: seq.sequence,
                time: seq.time.unwrap_or_else(Utc::now),
                product_id: seq.product_id,
                kind,
            }
        }
    };

    Ok(ParsedMessage::Event(event))
}
