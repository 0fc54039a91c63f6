use connector_core::{ConnectorConfig, ConnectorError, EventStream, FeedConnector, SnapshotSource};
use metrics::SharedMetrics;
use orderbook::{Book, SharedBook};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::feed::WebSocketConnector;
use crate::reconnect::{log_backoff, ReconnectController};
use crate::session::{Anomaly, EventOutcome, EventStatus, ReconciliationSession};
use crate::snapshot::CoinbaseRestClient;

/// How a connection attempt ended.
enum SessionResult {
    /// Shutdown was requested.
    Shutdown,
    /// Streamed for a while, then the session ended.
    Ended(ConnectorError),
    /// Never got as far as streaming.
    ConnectFailed(ConnectorError),
}

fn record_anomalies(metrics: &SharedMetrics, anomalies: &[Anomaly]) {
    for anomaly in anomalies {
        match anomaly {
            Anomaly::SequenceGap { .. } => metrics.inc_sequence_gaps(),
            Anomaly::Divergence(_) | Anomaly::UnknownDone(_) => metrics.inc_order_anomalies(),
        }
    }
}

fn record_outcome(metrics: &SharedMetrics, outcome: &EventOutcome) {
    if outcome.status == EventStatus::Applied {
        metrics.inc_events_applied();
    }
    if outcome.trade_recorded {
        metrics.inc_trades_recorded();
    }
    record_anomalies(metrics, &outcome.anomalies);
}

/// Counts the anomaly that ended a session.
fn record_fatal(metrics: &SharedMetrics, err: &ConnectorError) {
    match err {
        ConnectorError::SequenceGap { .. } => metrics.inc_sequence_gaps(),
        ConnectorError::Book(_) => metrics.inc_order_anomalies(),
        _ => {}
    }
}

/// Runs one session: snapshot fetch and event stream race until the
/// stream fails, the session aborts, or shutdown is requested.
///
/// Returns `Ok(())` only on shutdown.
pub async fn drive_session<E, S>(
    stream: &mut E,
    snapshots: &S,
    session: &mut ReconciliationSession,
    product_id: &str,
    shutdown_rx: &mut watch::Receiver<bool>,
    metrics: &SharedMetrics,
) -> Result<(), ConnectorError>
where
    E: EventStream + ?Sized,
    S: SnapshotSource + ?Sized,
{
    let snapshot = snapshots.fetch_snapshot(product_id);
    tokio::pin!(snapshot);
    let mut snapshot_pending = true;

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received, ending session");
                    return Ok(());
                }
            }

            result = &mut snapshot, if snapshot_pending => {
                snapshot_pending = false;
                let snapshot = result?;
                metrics.inc_snapshots_fetched();
                let report = session.bootstrap(snapshot)?;
                for _ in 0..report.replayed {
                    metrics.inc_events_applied();
                }
                for _ in 0..report.trades_recorded {
                    metrics.inc_trades_recorded();
                }
                record_anomalies(metrics, &report.anomalies);
            }

            next = stream.next_event() => {
                let Some(event) = next? else {
                    return Err(ConnectorError::TransportLost("stream ended".to_string()));
                };
                let outcome = session.on_event(event)?;
                record_outcome(metrics, &outcome);
            }
        }
    }
}

async fn connect_and_run<C, S>(
    config: &ConnectorConfig,
    connector: &C,
    snapshots: &S,
    book: &SharedBook,
    controller: &mut ReconnectController,
    shutdown_rx: &mut watch::Receiver<bool>,
    metrics: &SharedMetrics,
) -> SessionResult
where
    C: FeedConnector,
    S: SnapshotSource,
{
    let connect = connector.connect(&config.product_id);

    let mut feed = tokio::select! {
        biased;

        changed = shutdown_rx.changed() => {
            if changed.is_err() || *shutdown_rx.borrow() {
                return SessionResult::Shutdown;
            }
            return SessionResult::ConnectFailed(ConnectorError::WebSocket(
                "connection interrupted".to_string(),
            ));
        }

        result = connect => match result {
            Ok(feed) => feed,
            Err(e) => return SessionResult::ConnectFailed(e),
        },
    };

    controller.on_streaming();
    let mut session =
        ReconciliationSession::new(book.clone(), config.policy, config.buffer_capacity);

    let result = drive_session(
        &mut feed,
        snapshots,
        &mut session,
        &config.product_id,
        shutdown_rx,
        metrics,
    )
    .await;

    let stats = session.stats();
    info!(
        applied = stats.applied,
        discarded = stats.discarded,
        gaps = stats.sequence_gaps,
        divergences = stats.divergences,
        unknown_done = stats.unknown_done,
        trades = stats.trades,
        last_sequence = ?session.last_applied_sequence(),
        "Session ended"
    );

    match result {
        Ok(()) => {
            feed.close().await;
            SessionResult::Shutdown
        }
        Err(e) => {
            // Nothing in the book can be trusted once the session is gone.
            *book.write() = Book::new();
            SessionResult::Ended(e)
        }
    }
}

/// Mirror the configured product until shutdown.
///
/// Every lost stream is retried. Streams that lasted less than
/// `config.min_stable_duration` back off exponentially first.
pub async fn run_connector(
    config: ConnectorConfig,
    book: SharedBook,
    shutdown_rx: watch::Receiver<bool>,
    metrics: SharedMetrics,
) -> Result<(), ConnectorError> {
    let snapshots = CoinbaseRestClient::new(config.environment, config.snapshot_timeout)
        .map_err(|e| ConnectorError::SnapshotUnavailable(e.to_string()))?;
    let connector = WebSocketConnector::new(
        config.environment.ws_url(),
        config.connect_timeout,
        metrics.clone(),
    );

    info!(
        product_id = %config.product_id,
        environment = %config.environment,
        abort_on_gap = config.policy.abort_on_gap,
        abort_on_divergence = config.policy.abort_on_divergence,
        "Starting feed connector"
    );

    run_feed_loop(&config, &connector, &snapshots, book, shutdown_rx, metrics).await;
    Ok(())
}

/// Connect, reconcile and reconnect until shutdown.
///
/// Each connection gets a new session over an emptied `book`. The book is
/// also emptied as soon as a session fails, so readers never see a stale
/// mirror while the loop backs off.
pub async fn run_feed_loop<C, S>(
    config: &ConnectorConfig,
    connector: &C,
    snapshots: &S,
    book: SharedBook,
    mut shutdown_rx: watch::Receiver<bool>,
    metrics: SharedMetrics,
) where
    C: FeedConnector,
    S: SnapshotSource,
{
    let mut controller = ReconnectController::new(config.min_stable_duration, config.backoff.clone());
    let mut reconnecting = false;

    loop {
        if *shutdown_rx.borrow() {
            info!("Shutdown requested, exiting connector");
            return;
        }

        let result = connect_and_run(
            config,
            connector,
            snapshots,
            &book,
            &mut controller,
            &mut shutdown_rx,
            &metrics,
        )
        .await;
        let streamed_for = controller.on_disconnected();

        match result {
            SessionResult::Shutdown => {
                info!("Connector shutdown complete");
                return;
            }
            SessionResult::Ended(e) => {
                if reconnecting {
                    metrics.inc_reconnect_successes();
                }
                record_fatal(&metrics, &e);
                error!(error = %e, "Session ended");
            }
            SessionResult::ConnectFailed(e) => {
                metrics.inc_websocket_errors();
                warn!(error = %e, "Connection failed");
            }
        }
        reconnecting = true;

        metrics.inc_reconnect_attempts();
        let delay = controller.enter_backoff(streamed_for);
        log_backoff(&controller, delay, streamed_for);

        if !controller.wait(delay, &mut shutdown_rx).await {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use connector_core::SessionPolicy;
    use metrics::create_metrics;
    use model::{BookSnapshot, EventKind, FeedEvent, Side, SnapshotOrder};
    use orderbook::create_shared_book;
    use rust_decimal_macros::dec;
    use common::BackoffConfig;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{mpsc, Notify};
    use tokio::time::Instant;

    struct ChannelStream(mpsc::UnboundedReceiver<FeedEvent>);

    #[async_trait]
    impl EventStream for ChannelStream {
        async fn next_event(&mut self) -> Result<Option<FeedEvent>, ConnectorError> {
            Ok(self.0.recv().await)
        }
    }

    /// Hands out its snapshot once the gate is opened.
    struct GatedSnapshot {
        gate: Arc<Notify>,
        snapshot: Option<BookSnapshot>,
    }

    #[async_trait]
    impl SnapshotSource for GatedSnapshot {
        async fn fetch_snapshot(&self, _product_id: &str) -> Result<BookSnapshot, ConnectorError> {
            self.gate.notified().await;
            self.snapshot
                .clone()
                .ok_or_else(|| ConnectorError::SnapshotUnavailable("HTTP 503".to_string()))
        }
    }

    fn event(sequence: u64, kind: EventKind) -> FeedEvent {
        FeedEvent {
            sequence,
            time: Utc::now(),
            product_id: "BTC-USD".to_string(),
            kind,
        }
    }

    /// Snapshot that is always available at once.
    struct ReadySnapshot(BookSnapshot);

    #[async_trait]
    impl SnapshotSource for ReadySnapshot {
        async fn fetch_snapshot(&self, _product_id: &str) -> Result<BookSnapshot, ConnectorError> {
            Ok(self.0.clone())
        }
    }

    /// One scripted connection attempt.
    enum Attempt {
        Refused,
        /// Delivers the events, stays open for the hold, then ends.
        Stream { events: Vec<FeedEvent>, hold: Duration },
    }

    struct ScriptedStream {
        events: VecDeque<FeedEvent>,
        hold: Option<Duration>,
    }

    #[async_trait]
    impl EventStream for ScriptedStream {
        async fn next_event(&mut self) -> Result<Option<FeedEvent>, ConnectorError> {
            if let Some(event) = self.events.pop_front() {
                return Ok(Some(event));
            }
            if let Some(hold) = self.hold.take() {
                tokio::time::sleep(hold).await;
            }
            Ok(None)
        }
    }

    /// Plays back attempts in order, then requests shutdown and refuses.
    struct ScriptedConnector {
        attempts: Mutex<VecDeque<Attempt>>,
        book: SharedBook,
        shutdown_tx: watch::Sender<bool>,
        /// Resting bids seen by each connect call.
        bids_at_connect: Mutex<Vec<usize>>,
        connected_at: Mutex<Vec<Instant>>,
    }

    impl ScriptedConnector {
        fn new(attempts: Vec<Attempt>, book: SharedBook, shutdown_tx: watch::Sender<bool>) -> Self {
            Self {
                attempts: Mutex::new(attempts.into()),
                book,
                shutdown_tx,
                bids_at_connect: Mutex::new(Vec::new()),
                connected_at: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl FeedConnector for ScriptedConnector {
        type Stream = ScriptedStream;

        async fn connect(&self, _product_id: &str) -> Result<ScriptedStream, ConnectorError> {
            self.bids_at_connect
                .lock()
                .push(self.book.read().bids().order_count());
            self.connected_at.lock().push(Instant::now());

            let next = self.attempts.lock().pop_front();
            match next {
                Some(Attempt::Stream { events, hold }) => Ok(ScriptedStream {
                    events: events.into(),
                    hold: Some(hold),
                }),
                Some(Attempt::Refused) => {
                    Err(ConnectorError::WebSocket("connection refused".to_string()))
                }
                None => {
                    self.shutdown_tx.send_replace(true);
                    Err(ConnectorError::WebSocket("connection refused".to_string()))
                }
            }
        }
    }

    fn loop_config() -> ConnectorConfig {
        ConnectorConfig {
            backoff: BackoffConfig {
                seed: Some(11),
                ..BackoffConfig::default()
            },
            ..ConnectorConfig::default()
        }
    }

    fn short(events: Vec<FeedEvent>) -> Attempt {
        Attempt::Stream {
            events,
            hold: Duration::ZERO,
        }
    }

    fn scenario_events() -> Vec<FeedEvent> {
        vec![
            event(
                9,
                EventKind::Open {
                    side: Side::Buy,
                    order_id: "O2".into(),
                    price: dec!(99),
                    remaining_size: dec!(1),
                },
            ),
            event(
                11,
                EventKind::Match {
                    side: Side::Buy,
                    maker_order_id: "O1".into(),
                    taker_order_id: "T".into(),
                    trade_id: 1,
                    price: dec!(100),
                    size: dec!(2),
                },
            ),
            event(
                12,
                EventKind::Done {
                    side: Side::Buy,
                    order_id: "O2".into(),
                    reason: "canceled".to_string(),
                    price: None,
                    remaining_size: None,
                },
            ),
        ]
    }

    fn scenario_snapshot() -> BookSnapshot {
        BookSnapshot {
            sequence: 10,
            bids: vec![SnapshotOrder {
                order_id: "O1".into(),
                price: dec!(100),
                size: dec!(5),
            }],
            asks: Vec::new(),
        }
    }

    fn ended_stream(events: Vec<FeedEvent>) -> ChannelStream {
        let (tx, rx) = mpsc::unbounded_channel();
        for e in events {
            tx.send(e).unwrap();
        }
        ChannelStream(rx)
    }

    #[tokio::test]
    async fn test_snapshot_first_then_live_events() {
        let book = create_shared_book();
        let metrics = create_metrics();
        let (_tx, mut shutdown_rx) = watch::channel(false);
        let gate = Arc::new(Notify::new());
        gate.notify_one();
        let snapshots = GatedSnapshot {
            gate,
            snapshot: Some(scenario_snapshot()),
        };
        let mut stream = ended_stream(scenario_events());
        let mut session = ReconciliationSession::new(book.clone(), SessionPolicy::default(), 100);

        let result = drive_session(
            &mut stream,
            &snapshots,
            &mut session,
            "BTC-USD",
            &mut shutdown_rx,
            &metrics,
        )
        .await;

        assert!(matches!(result, Err(ConnectorError::TransportLost(_))));
        assert_eq!(session.last_applied_sequence(), Some(12));
        let book = book.read();
        assert_eq!(book.bids().get(&"O1".into()).unwrap().size, dec!(3));
        assert!(!book.bids().contains(&"O2".into()));
        assert_eq!(metrics.snapshots_fetched(), 1);
        assert_eq!(metrics.events_applied(), 2);
        assert_eq!(metrics.trades_recorded(), 1);
        assert_eq!(metrics.order_anomalies(), 1);
    }

    #[tokio::test]
    async fn test_events_buffer_while_snapshot_outstanding() {
        let book = create_shared_book();
        let metrics = create_metrics();
        let (_tx, mut shutdown_rx) = watch::channel(false);
        let snapshots = GatedSnapshot {
            gate: Arc::new(Notify::new()),
            snapshot: Some(scenario_snapshot()),
        };
        let mut stream = ended_stream(scenario_events());
        let mut session = ReconciliationSession::new(book.clone(), SessionPolicy::default(), 100);

        let result = drive_session(
            &mut stream,
            &snapshots,
            &mut session,
            "BTC-USD",
            &mut shutdown_rx,
            &metrics,
        )
        .await;

        assert!(matches!(result, Err(ConnectorError::TransportLost(_))));
        assert!(!session.is_live());
        assert_eq!(session.buffered_len(), 3);
        assert!(book.read().bids().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_failure_ends_session() {
        let book = create_shared_book();
        let metrics = create_metrics();
        let (_tx, mut shutdown_rx) = watch::channel(false);
        let gate = Arc::new(Notify::new());
        gate.notify_one();
        let snapshots = GatedSnapshot {
            gate,
            snapshot: None,
        };
        let (_events_tx, rx) = mpsc::unbounded_channel();
        let mut stream = ChannelStream(rx);
        let mut session = ReconciliationSession::new(book, SessionPolicy::default(), 100);

        let result = drive_session(
            &mut stream,
            &snapshots,
            &mut session,
            "BTC-USD",
            &mut shutdown_rx,
            &metrics,
        )
        .await;

        assert!(matches!(result, Err(ConnectorError::SnapshotUnavailable(_))));
        assert_eq!(metrics.snapshots_fetched(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_ends_session_cleanly() {
        let book = create_shared_book();
        let metrics = create_metrics();
        let (tx, mut shutdown_rx) = watch::channel(false);
        let snapshots = GatedSnapshot {
            gate: Arc::new(Notify::new()),
            snapshot: Some(scenario_snapshot()),
        };
        let (_events_tx, rx) = mpsc::unbounded_channel();
        let mut stream = ChannelStream(rx);
        let mut session = ReconciliationSession::new(book, SessionPolicy::default(), 100);

        tx.send(true).unwrap();
        let result = drive_session(
            &mut stream,
            &snapshots,
            &mut session,
            "BTC-USD",
            &mut shutdown_rx,
            &metrics,
        )
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_gap_after_snapshot_is_counted() {
        let book = create_shared_book();
        let metrics = create_metrics();
        let (_tx, mut shutdown_rx) = watch::channel(false);
        let gate = Arc::new(Notify::new());
        gate.notify_one();
        let snapshots = GatedSnapshot {
            gate,
            snapshot: Some(scenario_snapshot()),
        };
        let received = |seq| {
            event(
                seq,
                EventKind::Received {
                    side: Side::Sell,
                    order_id: "R".into(),
                },
            )
        };
        let mut stream = ended_stream(vec![received(11), received(13)]);
        let mut session = ReconciliationSession::new(book, SessionPolicy::default(), 100);

        let result = drive_session(
            &mut stream,
            &snapshots,
            &mut session,
            "BTC-USD",
            &mut shutdown_rx,
            &metrics,
        )
        .await;

        assert!(matches!(
            result,
            Err(ConnectorError::SequenceGap {
                expected: 12,
                actual: 13
            })
        ));
        assert_eq!(session.last_applied_sequence(), Some(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_rebuilds_after_every_failure() {
        let book = create_shared_book();
        let metrics = create_metrics();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let snapshots = ReadySnapshot(scenario_snapshot());
        let ghost_match = event(
            11,
            EventKind::Match {
                side: Side::Sell,
                maker_order_id: "ghost".into(),
                taker_order_id: "T".into(),
                trade_id: 7,
                price: dec!(101),
                size: dec!(1),
            },
        );
        let received = |seq| {
            event(
                seq,
                EventKind::Received {
                    side: Side::Buy,
                    order_id: "R".into(),
                },
            )
        };
        let connector = ScriptedConnector::new(
            vec![
                // Gap after the snapshot.
                short(vec![received(11), received(13)]),
                Attempt::Refused,
                // Match for an order the book never held.
                short(vec![ghost_match]),
                // Transport drops right after bootstrap.
                short(Vec::new()),
            ],
            book.clone(),
            shutdown_tx,
        );

        run_feed_loop(
            &loop_config(),
            &connector,
            &snapshots,
            book.clone(),
            shutdown_rx,
            metrics.clone(),
        )
        .await;

        // Four scripted attempts plus the one that requested shutdown.
        assert_eq!(*connector.bids_at_connect.lock(), vec![0; 5]);
        assert!(book.read().bids().is_empty());
        assert!(book.read().asks().is_empty());

        assert_eq!(metrics.snapshots_fetched(), 3);
        assert_eq!(metrics.reconnect_attempts(), 5);
        assert_eq!(metrics.reconnect_successes(), 2);
        assert_eq!(metrics.websocket_errors(), 2);
        assert_eq!(metrics.sequence_gaps(), 1);
        assert_eq!(metrics.order_anomalies(), 1);

        // Every stream was short, so each reconnect waited 2^n s and more.
        let connected_at = connector.connected_at.lock();
        for (n, pair) in connected_at.windows(2).enumerate() {
            let waited = pair[1] - pair[0];
            let floor = Duration::from_secs(2u64.pow(n as u32 + 1));
            assert!(waited >= floor, "attempt {} waited {:?}", n + 1, waited);
            assert!(waited <= floor + Duration::from_millis(1_010));
        }
        // Shutdown arrived during the last backoff, which was never slept.
        assert_eq!(Instant::now(), connected_at[4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_stream_reconnects_without_backoff() {
        let book = create_shared_book();
        let metrics = create_metrics();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let snapshots = ReadySnapshot(scenario_snapshot());
        let connector = ScriptedConnector::new(
            vec![
                Attempt::Stream {
                    events: Vec::new(),
                    hold: Duration::from_secs(5),
                },
                short(Vec::new()),
            ],
            book.clone(),
            shutdown_tx,
        );

        run_feed_loop(
            &loop_config(),
            &connector,
            &snapshots,
            book.clone(),
            shutdown_rx,
            metrics.clone(),
        )
        .await;

        let connected_at = connector.connected_at.lock();
        assert_eq!(connected_at.len(), 3);
        // Straight back in after the stable stream.
        let stable = connected_at[1] - connected_at[0];
        assert!(stable >= Duration::from_secs(5) && stable < Duration::from_secs(6));
        // The short one backs off.
        assert!(connected_at[2] - connected_at[1] >= Duration::from_secs(2));
        assert_eq!(metrics.reconnect_successes(), 1);
        assert!(book.read().bids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_first_connect() {
        let book = create_shared_book();
        let metrics = create_metrics();
        let (shutdown_tx, shutdown_rx) = watch::channel(true);
        let connector = ScriptedConnector::new(Vec::new(), book.clone(), shutdown_tx);

        run_feed_loop(
            &loop_config(),
            &connector,
            &ReadySnapshot(scenario_snapshot()),
            book,
            shutdown_rx,
            metrics.clone(),
        )
        .await;

        assert!(connector.connected_at.lock().is_empty());
        assert_eq!(metrics.reconnect_attempts(), 0);
    }
}
