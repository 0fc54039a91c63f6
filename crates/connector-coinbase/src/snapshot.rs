//! Full-depth (level 3) book snapshots over REST.

use std::time::Duration;

use async_trait::async_trait;
use common::FeedEnvironment;
use connector_core::{ConnectorError, SnapshotSource};
use model::{BookSnapshot, OrderId, SnapshotOrder};
use rest_client::{RestClient, RestError};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Response from GET /products/{product_id}/book?level=3.
///
/// Each entry is `[price, size, order_id]`.
#[derive(Debug, Clone, Deserialize)]
pub struct Level3BookResponse {
    pub sequence: u64,
    pub bids: Vec<(Decimal, Decimal, OrderId)>,
    pub asks: Vec<(Decimal, Decimal, OrderId)>,
}

impl From<Level3BookResponse> for BookSnapshot {
    fn from(response: Level3BookResponse) -> Self {
        fn orders(entries: Vec<(Decimal, Decimal, OrderId)>) -> Vec<SnapshotOrder> {
            entries
                .into_iter()
                .map(|(price, size, order_id)| SnapshotOrder {
                    order_id,
                    price,
                    size,
                })
                .collect()
        }

        BookSnapshot {
            sequence: response.sequence,
            bids: orders(response.bids),
            asks: orders(response.asks),
        }
    }
}

/// Public market-data REST client.
pub struct CoinbaseRestClient {
    client: RestClient,
    environment: FeedEnvironment,
}

impl CoinbaseRestClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(environment: FeedEnvironment, timeout: Duration) -> Result<Self, RestError> {
        let client = RestClient::new(environment.rest_base_url(), timeout)?;
        Ok(Self {
            client,
            environment,
        })
    }

    pub fn environment(&self) -> FeedEnvironment {
        self.environment
    }

    /// Fetch every resting order for `product_id`.
    pub async fn get_book_snapshot(&self, product_id: &str) -> Result<BookSnapshot, RestError> {
        let path = format!("/products/{}/book", product_id);
        let response: Level3BookResponse = self.client.get(&path, Some("level=3")).await?;

        tracing::info!(
            product_id = %product_id,
            sequence = response.sequence,
            bids = response.bids.len(),
            asks = response.asks.len(),
            "Fetched level 3 snapshot"
        );

        Ok(response.into())
    }
}

#[async_trait]
impl SnapshotSource for CoinbaseRestClient {
    async fn fetch_snapshot(&self, product_id: &str) -> Result<BookSnapshot, ConnectorError> {
        self.get_book_snapshot(product_id).await.map_err(|e| {
            tracing::warn!(
                product_id = %product_id,
                error = %e,
                transient = e.is_transient(),
                "Snapshot request failed"
            );
            ConnectorError::SnapshotUnavailable(e.to_string())
        })
    }
}
