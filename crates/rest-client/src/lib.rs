//! JSON-over-HTTP client for the exchange's public REST endpoints.
//!
//! Wraps `reqwest` with a fixed base URL, a request timeout and a
//! User-Agent, and folds transport and HTTP failures into [`RestError`].

mod client;
mod error;

pub use client::RestClient;
pub use error::RestError;
