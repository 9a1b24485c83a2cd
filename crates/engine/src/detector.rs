//! Change detection against the persisted checkpoint.
//!
//! Pure classification; it never touches the store, so the rule can be
//! tested without one.

use watchlist_core::{TransactionFingerprint, WatchlistEntry};

/// Outcome of comparing a fresh fetch with an entry's checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// The source had nothing to report (no history, or the fetch failed).
    NoData,
    /// Latest transaction is the one already checkpointed.
    Unchanged,
    /// A transaction the entry has not seen yet.
    New(TransactionFingerprint),
}

impl Detection {
    pub fn is_new(&self) -> bool {
        matches!(self, Detection::New(_))
    }

    /// Label for log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Detection::NoData => "no_data",
            Detection::Unchanged => "unchanged",
            Detection::New(_) => "new",
        }
    }
}

/// Classify `fetched` against the entry's last checkpoint.
///
/// An entry without a checkpoint and an address with history yields `New`,
/// so the first observed transaction always produces one alert.
pub fn detect(entry: &WatchlistEntry, fetched: Option<TransactionFingerprint>) -> Detection {
    let Some(tx) = fetched else {
        return Detection::NoData;
    };

    match entry.last_checkpoint.as_deref() {
        Some(seen) if seen.eq_ignore_ascii_case(&tx.hash) => Detection::Unchanged,
        _ => Detection::New(tx),
    }
}
