//! Persisted alert records.

use crate::{Address, TransactionFingerprint, Wei};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One detected new transaction for a watchlist entry.
///
/// At most one exists per `(watchlist_entry_id, tx_hash)`. Immutable once
/// written, except `notification_sent` (false -> true, never back) and the
/// delivery attempt counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: i64,
    pub watchlist_entry_id: i64,
    pub address: Address,
    pub tx_hash: String,
    pub counterparty_from: Address,
    pub counterparty_to: Option<Address>,
    pub value: Wei,
    pub tx_timestamp: DateTime<Utc>,
    pub block_number: u64,
    /// When the alert was recorded.
    pub created_at: DateTime<Utc>,
    pub notification_sent: bool,
    pub notification_attempts: u32,
}

impl AlertEvent {
    /// Rebuild the transaction snapshot this alert was recorded from.
    pub fn transaction(&self) -> TransactionFingerprint {
        TransactionFingerprint {
            hash: self.tx_hash.clone(),
            from: self.counterparty_from.clone(),
            to: self.counterparty_to.clone(),
            value: self.value,
            timestamp: self.tx_timestamp,
            block_number: self.block_number,
        }
    }
}
