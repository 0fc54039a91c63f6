//! Coinbase Exchange full-channel connector.
//!
//! Keeps a [`SharedBook`](orderbook::SharedBook) in step with the exchange's
//! level 3 feed for one product, reconnecting and rebuilding from a fresh
//! snapshot whenever the stream is lost.

mod client;
mod feed;
mod parser;
mod reconnect;
mod session;
mod snapshot;

pub use client::{drive_session, run_connector, run_feed_loop};
pub use feed::{CoinbaseFeed, WebSocketConnector};
pub use parser::{parse_message, subscribe_message, ParsedMessage};
pub use reconnect::{ConnectionState, ReconnectController};
pub use session::{
    Anomaly, BootstrapReport, EventOutcome, EventStatus, ReconciliationSession, SessionStats,
};
pub use snapshot::{CoinbaseRestClient, Level3BookResponse};
