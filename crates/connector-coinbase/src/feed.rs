use std::time::Duration;

use async_trait::async_trait;
use connector_core::{ConnectorError, EventStream, FeedConnector};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use metrics::SharedMetrics;
use model::FeedEvent;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::parser::{parse_message, subscribe_message, ParsedMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Subscribed full-channel WebSocket for one product.
pub struct CoinbaseFeed {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    metrics: SharedMetrics,
}

impl CoinbaseFeed {
    /// Opens the socket and sends the subscribe request.
    pub async fn connect(
        url: &str,
        product_id: &str,
        timeout: Duration,
        metrics: SharedMetrics,
    ) -> Result<Self, ConnectorError> {
        info!(url = %url, product_id = %product_id, "Connecting to feed");

        let (ws_stream, _) = match tokio::time::timeout(timeout, connect_async(url)).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => return Err(ConnectorError::WebSocket(e.to_string())),
            Err(_) => return Err(ConnectorError::WebSocket("connection timeout".to_string())),
        };

        let (mut write, read) = ws_stream.split();
        write
            .send(Message::Text(subscribe_message(product_id)))
            .await
            .map_err(|e| ConnectorError::WebSocket(e.to_string()))?;

        info!(product_id = %product_id, "Subscribed to full channel");
        Ok(Self {
            write,
            read,
            metrics,
        })
    }
}

/// Connects a [`CoinbaseFeed`] to a fixed endpoint.
pub struct WebSocketConnector {
    url: String,
    timeout: Duration,
    metrics: SharedMetrics,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>, timeout: Duration, metrics: SharedMetrics) -> Self {
        Self {
            url: url.into(),
            timeout,
            metrics,
        }
    }
}

#[async_trait]
impl FeedConnector for WebSocketConnector {
    type Stream = CoinbaseFeed;

    async fn connect(&self, product_id: &str) -> Result<CoinbaseFeed, ConnectorError> {
        CoinbaseFeed::connect(&self.url, product_id, self.timeout, self.metrics.clone()).await
    }
}

#[async_trait]
impl EventStream for CoinbaseFeed {
    async fn next_event(&mut self) -> Result<Option<FeedEvent>, ConnectorError> {
        loop {
            let msg = match self.read.next().await {
                Some(Ok(m)) => m,
                Some(Err(e)) => {
                    self.metrics.inc_websocket_errors();
                    return Err(ConnectorError::TransportLost(e.to_string()));
                }
                None => return Ok(None),
            };

            match msg {
                Message::Text(text) => {
                    self.metrics.inc_messages_received();
                    match parse_message(&text) {
                        Ok(ParsedMessage::Event(event)) => return Ok(Some(event)),
                        Ok(ParsedMessage::Subscriptions) => debug!("Subscription confirmed"),
                        Ok(ParsedMessage::Error(message)) => {
                            return Err(ConnectorError::Feed(message));
                        }
                        Ok(ParsedMessage::Unknown) => {}
                        Err(e) => {
                            // A lost sequenced message shows up as a gap later.
                            self.metrics.inc_parse_errors();
                            warn!(error = %e, "Failed to parse message");
                        }
                    }
                }
                Message::Ping(data) => {
                    debug!("Received Ping, sending Pong");
                    if let Err(e) = self.write.send(Message::Pong(data)).await {
                        self.metrics.inc_websocket_errors();
                        return Err(ConnectorError::TransportLost(e.to_string()));
                    }
                }
                Message::Close(frame) => {
                    info!(frame = ?frame, "Feed closed by server");
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.write.close().await;
    }
}
