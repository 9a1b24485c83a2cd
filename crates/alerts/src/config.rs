//! Store and delivery configuration types.

use crate::retry::RetryPolicy;
use std::time::Duration;

/// Connection settings for the shared SQLite store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// sqlx connection string, e.g. `sqlite://fraud_history.db`.
    pub database_url: String,
    /// Pool size. The monitor is sequential, so a few connections suffice.
    pub max_connections: u32,
    /// How long SQLite itself waits on a locked database before reporting busy.
    pub busy_timeout: Duration,
    /// Application-level retry applied on top of `busy_timeout`.
    pub retry: RetryPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://fraud_history.db".to_string(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

impl StoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }
}

/// Configuration for notification delivery.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Send attempts per alert before it is left for manual follow-up.
    pub max_attempts: u32,
    /// Pending alerts picked up per retry pass.
    pub retry_batch_size: u32,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_batch_size: 50,
        }
    }
}
