//! Exchange environment configuration.
//!
//! Supports production and sandbox environments with appropriate URLs.

use std::fmt;
use std::str::FromStr;

/// Exchange environment (production or sandbox).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedEnvironment {
    /// Production feed.
    #[default]
    Production,
    /// Public sandbox feed.
    Sandbox,
}

impl FeedEnvironment {
    /// REST API base URL, used for the book snapshot.
    pub fn rest_base_url(&self) -> &'static str {
        match self {
            Self::Production => "https://api.exchange.coinbase.com",
            Self::Sandbox => "https://api-public.sandbox.exchange.coinbase.com",
        }
    }

    /// WebSocket URL of the market data feed.
    pub fn ws_url(&self) -> &'static str {
        match self {
            Self::Production => "wss://ws-feed.exchange.coinbase.com",
            Self::Sandbox => "wss://ws-feed-public.sandbox.exchange.coinbase.com",
        }
    }

    /// Load environment from `FEED_ENVIRONMENT` env var.
    ///
    /// Returns `Production` if not set or invalid.
    pub fn from_env() -> Self {
        std::env::var("FEED_ENVIRONMENT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for FeedEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Sandbox => write!(f, "sandbox"),
        }
    }
}

impl FromStr for FeedEnvironment {
    type Err = ParseEnvironmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "sandbox" | "test" => Ok(Self::Sandbox),
            _ => Err(ParseEnvironmentError(s.to_string())),
        }
    }
}

/// Error parsing environment string.
#[derive(Debug, Clone)]
pub struct ParseEnvironmentError(String);

impl fmt::Display for ParseEnvironmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid environment '{}', expected 'production' or 'sandbox'",
            self.0
        )
    }
}

impl std::error::Error for ParseEnvironmentError {}
