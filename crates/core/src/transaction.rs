//! Latest-transaction snapshot returned by the ledger source.

use crate::{Address, Wei};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of a transfer the watched address was on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Incoming,
    Outgoing,
    /// Watched address sent to itself.
    SelfTransfer,
    /// Neither sender nor receiver matches (e.g. an internal call surfaced by
    /// the explorer).
    Unrelated,
}

/// The explorer's identifier for one transaction plus the fields needed to
/// describe it in an alert.
///
/// Built fresh on every poll and dropped at the end of the cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFingerprint {
    /// Transaction hash, lowercase hex with `0x` prefix.
    pub hash: String,
    pub from: Address,
    /// `None` for contract creations.
    pub to: Option<Address>,
    pub value: Wei,
    pub timestamp: DateTime<Utc>,
    pub block_number: u64,
}

impl TransactionFingerprint {
    /// Classify this transaction relative to a watched address.
    pub fn direction_for(&self, watched: &Address) -> Direction {
        let outgoing = &self.from == watched;
        let incoming = self.to.as_ref() == Some(watched);
        match (incoming, outgoing) {
            (true, true) => Direction::SelfTransfer,
            (true, false) => Direction::Incoming,
            (false, true) => Direction::Outgoing,
            (false, false) => Direction::Unrelated,
        }
    }

    /// Receiver as text, with contract creations rendered explicitly.
    pub fn to_display(&self) -> &str {
        self.to
            .as_ref()
            .map(Address::as_str)
            .unwrap_or("(contract creation)")
    }
}
