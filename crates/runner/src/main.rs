use connector_coinbase::run_connector;
use connector_core::ConnectorConfig;
use metrics::create_metrics;
use orderbook::{create_shared_book, SharedBook};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Interval for periodic health and top-of-book logging.
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(10);

fn log_top_of_book(book: &SharedBook) {
    let book = book.read();
    let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) else {
        info!("Book not yet synchronized");
        return;
    };
    let last_trade = book.last_trade().map(|t| format!("{} {} @ {}", t.side, t.size, t.price));
    info!(
        bid = %bid.price,
        bid_size = %bid.size,
        ask = %ask.price,
        ask_size = %ask.size,
        spread = %(ask.price - bid.price),
        bid_orders = book.bids().order_count(),
        ask_orders = book.asks().order_count(),
        last_trade = last_trade.as_deref().unwrap_or("-"),
        "Top of book"
    );
}

#[tokio::main]
async fn main() {
    common::init_logging();

    let mut config = ConnectorConfig::from_env();
    if let Some(product_id) = std::env::args().nth(1) {
        config.product_id = product_id;
    }

    info!(product_id = %config.product_id, "Starting order book mirror");

    let book = create_shared_book();
    let metrics = create_metrics();

    // Create shutdown signal channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let connector_book = book.clone();
    let connector_metrics = metrics.clone();
    let connector_handle = tokio::spawn(async move {
        if let Err(e) = run_connector(config, connector_book, shutdown_rx, connector_metrics).await {
            tracing::error!(error = %e, "Connector error");
        }
    });

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, initiating shutdown");
            let _ = shutdown_tx_clone.send(true);
        }
    });

    let mut interval = tokio::time::interval(STATUS_LOG_INTERVAL);
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let snapshot = metrics.snapshot();
                info!(
                    status = %snapshot.health_status(),
                    events = snapshot.events_applied,
                    events_per_sec = format!("{:.1}", snapshot.events_per_second),
                    gaps = snapshot.sequence_gaps,
                    anomalies = snapshot.order_anomalies,
                    reconnects = snapshot.reconnect_attempts,
                    "Health check"
                );
                log_top_of_book(&book);
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!("Waiting for connector to finish");
    let _ = connector_handle.await;

    println!("\n{}", metrics.snapshot());
    info!("Shutdown complete");
}
