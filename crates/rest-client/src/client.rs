use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::RestError;

/// The exchange rejects requests without a User-Agent.
const USER_AGENT: &str = concat!("l3-book-mirror/", env!("CARGO_PKG_VERSION"));

/// Characters of an unparseable body kept for the log line.
const BODY_LOG_LIMIT: usize = 256;

/// Used when the server sends 429 without a usable `Retry-After`.
const DEFAULT_RETRY_AFTER_MS: u64 = 1_000;

pub struct RestClient {
    http: Client,
    base_url: String,
}

impl RestClient {
    /// # Errors
    /// Returns [`RestError::Build`] if the TLS backend cannot be initialised.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RestError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RestError::Build(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` with an optional query string (no leading `?`) and decode
    /// the JSON body as `T`.
    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: Option<&str>) -> Result<T, RestError> {
        let url = self.url(path, query);
        tracing::debug!(url = %url, "GET");
        let response = self.http.get(&url).send().await?;
        decode(response).await
    }

    fn url(&self, path: &str, query: Option<&str>) -> String {
        match query.filter(|q| !q.is_empty()) {
            Some(q) => format!("{}{}?{}", self.base_url, path, q),
            None => format!("{}{}", self.base_url, path),
        }
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RestError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_ms = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(DEFAULT_RETRY_AFTER_MS, |secs| secs.saturating_mul(1_000));
        return Err(RestError::RateLimited { retry_after_ms });
    }

    let body = response.text().await?;
    if !status.is_success() {
        return Err(RestError::Status {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|e| {
        // Full-depth bodies run to megabytes.
        let head: String = body.chars().take(BODY_LOG_LIMIT).collect();
        tracing::warn!(body = %head, error = %e, "Undecodable response body");
        RestError::Parse(e.to_string())
    })
}
