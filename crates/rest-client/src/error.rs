use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestError {
    /// Non-success status; `body` is whatever the server sent back.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    /// Body was not the JSON shape the caller asked for.
    #[error("invalid response body: {0}")]
    Parse(String),

    /// Public endpoints throttle per IP.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("failed to build HTTP client: {0}")]
    Build(String),
}

impl RestError {
    /// Whether the same request may succeed if issued again later.
    pub fn is_transient(&self) -> bool {
        match self {
            RestError::Timeout | RestError::Connection(_) | RestError::RateLimited { .. } => true,
            RestError::Status { status, .. } => *status >= 500,
            RestError::Parse(_) | RestError::Build(_) => false,
        }
    }
}

impl From<reqwest::Error> for RestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return RestError::Timeout;
        }
        if err.is_decode() {
            return RestError::Parse(err.to_string());
        }
        match err.status() {
            Some(status) => RestError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => RestError::Connection(err.to_string()),
        }
    }
}
