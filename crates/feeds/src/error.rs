//! Error types for ledger feed operations.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while polling the ledger data source.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Request failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FeedError::Timeout(err.to_string())
        } else if err.is_decode() {
            FeedError::ParseError(err.to_string())
        } else if let Some(status) = err.status() {
            FeedError::HttpStatus(status.as_u16())
        } else {
            FeedError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::ParseError(err.to_string())
    }
}

impl From<url::ParseError> for FeedError {
    fn from(err: url::ParseError) -> Self {
        FeedError::InvalidEndpoint(err.to_string())
    }
}

impl From<watchlist_core::CoreError> for FeedError {
    fn from(err: watchlist_core::CoreError) -> Self {
        FeedError::ParseError(err.to_string())
    }
}

impl FeedError {
    /// Returns true if this error is transient and likely to succeed on the
    /// next poll.
    pub fn is_transient(&self) -> bool {
        match self {
            FeedError::ConnectionFailed(_)
            | FeedError::Timeout(_)
            | FeedError::RateLimitExceeded
            | FeedError::ParseError(_) => true,
            FeedError::HttpStatus(code) => *code == 429 || *code >= 500,
            FeedError::InvalidEndpoint(_) => false,
        }
    }

    /// Returns a suggested retry delay for this error type, if applicable.
    pub fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            FeedError::RateLimitExceeded => Some(Duration::from_secs(5)),
            FeedError::HttpStatus(429) => Some(Duration::from_secs(5)),
            FeedError::ConnectionFailed(_) | FeedError::Timeout(_) => {
                Some(Duration::from_secs(2))
            }
            _ => None,
        }
    }
}
