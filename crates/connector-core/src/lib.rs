use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use common::{BackoffConfig, FeedEnvironment};
use model::{BookSnapshot, FeedEvent};
use orderbook::OrderBookError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Stream ended or failed mid-session.
    #[error("Transport lost: {0}")]
    TransportLost(String),

    /// Snapshot fetch failed or timed out.
    #[error("Snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    #[error("Sequence gap: expected {expected}, got {actual}")]
    SequenceGap { expected: u64, actual: u64 },

    /// Too many events arrived while the snapshot was outstanding.
    #[error("Event buffer overflow at {capacity} events")]
    BufferOverflow { capacity: usize },

    /// Local book no longer matches the exchange.
    #[error("Book diverged: {0}")]
    Book(#[from] OrderBookError),

    /// Error message published by the exchange on the feed.
    #[error("Feed error: {0}")]
    Feed(String),
}

/// What a session does when the feed misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// End the session on a sequence gap or regression.
    pub abort_on_gap: bool,
    /// End the session on a duplicate insert, an unknown order in a
    /// reduction, or a size increase.
    pub abort_on_divergence: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            abort_on_gap: true,
            abort_on_divergence: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Instrument to mirror, e.g. `BTC-USD`.
    pub product_id: String,
    /// Production or sandbox endpoints.
    pub environment: FeedEnvironment,
    /// Maximum events buffered while the snapshot is outstanding.
    pub buffer_capacity: usize,
    /// Streams shorter than this count as unhealthy and back off.
    pub min_stable_duration: Duration,
    pub backoff: BackoffConfig,
    pub policy: SessionPolicy,
    pub connect_timeout: Duration,
    pub snapshot_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            product_id: "BTC-USD".to_string(),
            environment: FeedEnvironment::default(),
            buffer_capacity: 10_000,
            min_stable_duration: Duration::from_secs(2),
            backoff: BackoffConfig::default(),
            policy: SessionPolicy::default(),
            connect_timeout: Duration::from_secs(30),
            snapshot_timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectorConfig {
    /// Load overrides from `FEED_*` environment variables.
    ///
    /// Unset or unparseable variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|v| v.trim().parse().ok())
        }

        let mut config = Self::default();
        if let Some(environment) = parse(&lookup, "FEED_ENVIRONMENT") {
            config.environment = environment;
        }
        if let Some(product_id) = lookup("FEED_PRODUCT_ID").filter(|p| !p.trim().is_empty()) {
            config.product_id = product_id.trim().to_string();
        }
        if let Some(capacity) = parse::<usize>(&lookup, "FEED_BUFFER_CAPACITY").filter(|c| *c > 0) {
            config.buffer_capacity = capacity;
        }
        if let Some(abort) = parse(&lookup, "FEED_ABORT_ON_GAP") {
            config.policy.abort_on_gap = abort;
        }
        if let Some(abort) = parse(&lookup, "FEED_ABORT_ON_DIVERGENCE") {
            config.policy.abort_on_divergence = abort;
        }
        config
    }
}

/// Ordered source of decoded feed events for one session.
#[async_trait]
pub trait EventStream: Send {
    /// Waits for the next sequenced event.
    ///
    /// `Ok(None)` means the stream ended. Must be cancel safe: the session
    /// drops this future when the snapshot completes first.
    async fn next_event(&mut self) -> Result<Option<FeedEvent>, ConnectorError>;

    /// Ends the stream politely on shutdown. Errors are ignored.
    async fn close(&mut self) {}
}

/// Opens a subscribed [`EventStream`] for each new session.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    type Stream: EventStream;

    async fn connect(&self, product_id: &str) -> Result<Self::Stream, ConnectorError>;
}

/// One-shot full-depth snapshot provider.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, product_id: &str) -> Result<BookSnapshot, ConnectorError>;
}
