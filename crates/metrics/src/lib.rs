use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Thread-safe metrics collector for the book feed.
#[derive(Debug)]
pub struct FeedMetrics {
    // Counters
    messages_received: AtomicU64,
    events_applied: AtomicU64,
    trades_recorded: AtomicU64,
    parse_errors: AtomicU64,
    websocket_errors: AtomicU64,
    sequence_gaps: AtomicU64,
    order_anomalies: AtomicU64,
    snapshots_fetched: AtomicU64,
    reconnect_attempts: AtomicU64,
    reconnect_successes: AtomicU64,

    // Timestamps
    inner: RwLock<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    start_time: Instant,
    last_event_time: Option<Instant>,
    last_error_time: Option<Instant>,
    last_reconnect_time: Option<Instant>,
}

impl Default for FeedMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            events_applied: AtomicU64::new(0),
            trades_recorded: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            websocket_errors: AtomicU64::new(0),
            sequence_gaps: AtomicU64::new(0),
            order_anomalies: AtomicU64::new(0),
            snapshots_fetched: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            reconnect_successes: AtomicU64::new(0),
            inner: RwLock::new(MetricsInner {
                start_time: Instant::now(),
                last_event_time: None,
                last_error_time: None,
                last_reconnect_time: None,
            }),
        }
    }

    // --- Increment methods ---

    pub fn inc_messages_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_events_applied(&self) {
        self.events_applied.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_event_time = Some(Instant::now());
    }

    pub fn inc_trades_recorded(&self) {
        self.trades_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_parse_errors(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_error_time = Some(Instant::now());
    }

    pub fn inc_websocket_errors(&self) {
        self.websocket_errors.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_error_time = Some(Instant::now());
    }

    pub fn inc_sequence_gaps(&self) {
        self.sequence_gaps.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_error_time = Some(Instant::now());
    }

    pub fn inc_order_anomalies(&self) {
        self.order_anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_snapshots_fetched(&self) {
        self.snapshots_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_reconnect_time = Some(Instant::now());
    }

    pub fn inc_reconnect_successes(&self) {
        self.reconnect_successes.fetch_add(1, Ordering::Relaxed);
    }

    // --- Getter methods ---

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn events_applied(&self) -> u64 {
        self.events_applied.load(Ordering::Relaxed)
    }

    pub fn trades_recorded(&self) -> u64 {
        self.trades_recorded.load(Ordering::Relaxed)
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    pub fn websocket_errors(&self) -> u64 {
        self.websocket_errors.load(Ordering::Relaxed)
    }

    pub fn sequence_gaps(&self) -> u64 {
        self.sequence_gaps.load(Ordering::Relaxed)
    }

    pub fn order_anomalies(&self) -> u64 {
        self.order_anomalies.load(Ordering::Relaxed)
    }

    pub fn snapshots_fetched(&self) -> u64 {
        self.snapshots_fetched.load(Ordering::Relaxed)
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    pub fn reconnect_successes(&self) -> u64 {
        self.reconnect_successes.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> f64 {
        self.inner.read().start_time.elapsed().as_secs_f64()
    }

    pub fn secs_since_last_event(&self) -> Option<f64> {
        self.inner
            .read()
            .last_event_time
            .map(|t| t.elapsed().as_secs_f64())
    }

    pub fn secs_since_last_error(&self) -> Option<f64> {
        self.inner
            .read()
            .last_error_time
            .map(|t| t.elapsed().as_secs_f64())
    }

    pub fn secs_since_last_reconnect(&self) -> Option<f64> {
        self.inner
            .read()
            .last_reconnect_time
            .map(|t| t.elapsed().as_secs_f64())
    }

    /// Applied events per second since start.
    pub fn events_per_second(&self) -> f64 {
        let uptime = self.uptime_secs();
        if uptime > 0.0 {
            self.events_applied() as f64 / uptime
        } else {
            0.0
        }
    }

    /// Generate a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received(),
            events_applied: self.events_applied(),
            trades_recorded: self.trades_recorded(),
            parse_errors: self.parse_errors(),
            websocket_errors: self.websocket_errors(),
            sequence_gaps: self.sequence_gaps(),
            order_anomalies: self.order_anomalies(),
            snapshots_fetched: self.snapshots_fetched(),
            reconnect_attempts: self.reconnect_attempts(),
            reconnect_successes: self.reconnect_successes(),
            uptime_secs: self.uptime_secs(),
            events_per_second: self.events_per_second(),
            secs_since_last_event: self.secs_since_last_event(),
            secs_since_last_error: self.secs_since_last_error(),
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub events_applied: u64,
    pub trades_recorded: u64,
    pub parse_errors: u64,
    pub websocket_errors: u64,
    pub sequence_gaps: u64,
    pub order_anomalies: u64,
    pub snapshots_fetched: u64,
    pub reconnect_attempts: u64,
    pub reconnect_successes: u64,
    pub uptime_secs: f64,
    pub events_per_second: f64,
    pub secs_since_last_event: Option<f64>,
    pub secs_since_last_error: Option<f64>,
}

/// Health status of the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Book is being updated.
    Healthy,
    /// Updates are stale.
    Degraded,
    /// No updates for an extended period.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

impl MetricsSnapshot {
    /// Threshold in seconds for considering the book stale (degraded).
    const STALE_THRESHOLD_SECS: f64 = 15.0;
    /// Threshold in seconds for considering the feed unhealthy.
    const UNHEALTHY_THRESHOLD_SECS: f64 = 60.0;

    /// Determine the health status based on time since the last applied event.
    pub fn health_status(&self) -> HealthStatus {
        let idle_secs = self.secs_since_last_event.unwrap_or(self.uptime_secs);

        if idle_secs > Self::UNHEALTHY_THRESHOLD_SECS {
            HealthStatus::Unhealthy
        } else if idle_secs > Self::STALE_THRESHOLD_SECS {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Feed Metrics ===")?;
        writeln!(f, "Uptime:              {:.1}s", self.uptime_secs)?;
        writeln!(f, "Messages received:   {}", self.messages_received)?;
        writeln!(f, "Events applied:      {}", self.events_applied)?;
        writeln!(f, "Events/sec:          {:.2}", self.events_per_second)?;
        writeln!(f, "Trades recorded:     {}", self.trades_recorded)?;
        writeln!(f, "Parse errors:        {}", self.parse_errors)?;
        writeln!(f, "WebSocket errors:    {}", self.websocket_errors)?;
        writeln!(f, "Sequence gaps:       {}", self.sequence_gaps)?;
        writeln!(f, "Order anomalies:     {}", self.order_anomalies)?;
        writeln!(f, "Snapshots fetched:   {}", self.snapshots_fetched)?;
        writeln!(f, "Reconnect attempts:  {}", self.reconnect_attempts)?;
        writeln!(f, "Reconnect successes: {}", self.reconnect_successes)?;
        if let Some(secs) = self.secs_since_last_event {
            writeln!(f, "Since last event:    {:.1}s", secs)?;
        }
        if let Some(secs) = self.secs_since_last_error {
            writeln!(f, "Since last error:    {:.1}s", secs)?;
        }
        Ok(())
    }
}

/// Shared handle to metrics.
pub type SharedMetrics = Arc<FeedMetrics>;

pub fn create_metrics() -> SharedMetrics {
    Arc::new(FeedMetrics::new())
}
