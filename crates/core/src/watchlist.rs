//! Watchlist entries and alert scope.

use crate::{Address, CoreError, Direction, TransactionFingerprint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which transactions of a watched address a subscriber wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertScope {
    #[default]
    All,
    Incoming,
    Outgoing,
}

impl AlertScope {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertScope::All => "all",
            AlertScope::Incoming => "incoming",
            AlertScope::Outgoing => "outgoing",
        }
    }

    /// Whether a transaction on `watched` falls inside this scope.
    /// Self-transfers count as both incoming and outgoing.
    pub fn matches(self, watched: &Address, tx: &TransactionFingerprint) -> bool {
        match (self, tx.direction_for(watched)) {
            (AlertScope::All, _) => true,
            (_, Direction::SelfTransfer) => true,
            (AlertScope::Incoming, Direction::Incoming) => true,
            (AlertScope::Outgoing, Direction::Outgoing) => true,
            _ => false,
        }
    }
}

impl FromStr for AlertScope {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "" => Ok(AlertScope::All),
            "incoming" | "in" => Ok(AlertScope::Incoming),
            "outgoing" | "out" => Ok(AlertScope::Outgoing),
            other => Err(CoreError::UnknownScope(other.to_string())),
        }
    }
}

impl fmt::Display for AlertScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One monitored address for one subscriber.
///
/// The monitor only ever writes `last_checkpoint` and `last_checked_at`;
/// everything else belongs to the watchlist management side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub id: i64,
    pub address: Address,
    /// Notification destination (a Telegram chat id).
    pub subscriber_contact: Option<String>,
    pub alert_scope: AlertScope,
    pub is_active: bool,
    /// Hash of the last transaction observed for this entry.
    pub last_checkpoint: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WatchlistEntry {
    /// Contact to notify, if one is configured.
    pub fn destination(&self) -> Option<&str> {
        self.subscriber_contact
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Whether a change on this entry should be delivered to the subscriber.
    pub fn wants(&self, tx: &TransactionFingerprint) -> bool {
        self.alert_scope.matches(&self.address, tx)
    }
}
