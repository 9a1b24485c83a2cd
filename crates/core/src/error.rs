//! Error types for parsing core values.

use thiserror::Error;

/// Errors raised while parsing addresses, scopes and amounts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unknown alert scope: {0}")]
    UnknownScope(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}
