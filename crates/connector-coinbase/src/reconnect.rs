use std::time::Duration;

use common::{BackoffConfig, ExponentialBackoff};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Streaming,
    Disconnected,
    Backoff,
}

/// Decides how long to wait before each reconnection.
///
/// A stream that lasted at least `min_stable_duration` reconnects
/// immediately. Shorter ones advance the backoff counter and wait
/// `2^n` seconds plus jitter.
pub struct ReconnectController {
    state: ConnectionState,
    backoff: ExponentialBackoff,
    min_stable_duration: Duration,
    streaming_since: Option<Instant>,
}

impl ReconnectController {
    pub fn new(min_stable_duration: Duration, backoff: BackoffConfig) -> Self {
        Self {
            state: ConnectionState::Connecting,
            backoff: ExponentialBackoff::new(backoff),
            min_stable_duration,
            streaming_since: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive short-lived streams since the counter last wrapped.
    pub fn attempt(&self) -> u32 {
        self.backoff.attempt()
    }

    pub fn on_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
        self.streaming_since = None;
    }

    pub fn on_streaming(&mut self) {
        self.state = ConnectionState::Streaming;
        self.streaming_since = Some(Instant::now());
    }

    /// Marks the stream as gone and returns how long it lasted.
    ///
    /// A connection that never reached streaming lasted zero.
    pub fn on_disconnected(&mut self) -> Duration {
        self.state = ConnectionState::Disconnected;
        self.streaming_since
            .take()
            .map_or(Duration::ZERO, |since| since.elapsed())
    }

    /// Delay before the next attempt given how long the last stream ran.
    pub fn enter_backoff(&mut self, streamed_for: Duration) -> Duration {
        self.state = ConnectionState::Backoff;
        if streamed_for >= self.min_stable_duration {
            return Duration::ZERO;
        }
        self.backoff.next_delay()
    }

    /// Waits out `delay` unless shutdown is requested first.
    ///
    /// Returns `false` on shutdown.
    pub async fn wait(&mut self, delay: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        if !delay.is_zero() {
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Shutdown requested during backoff");
                            return false;
                        }
                    }
                }
            }
        } else if *shutdown_rx.borrow() {
            return false;
        }
        self.on_connecting();
        true
    }
}

/// Logs the backoff decision for a lost stream.
pub(crate) fn log_backoff(controller: &ReconnectController, delay: Duration, streamed_for: Duration) {
    if delay.is_zero() {
        info!(
            streamed_secs = streamed_for.as_secs_f64(),
            "Stream was stable, reconnecting immediately"
        );
    } else {
        warn!(
            streamed_secs = streamed_for.as_secs_f64(),
            attempt = controller.attempt(),
            delay_secs = delay.as_secs_f64(),
            "Stream ended early, backing off"
        );
    }
}
