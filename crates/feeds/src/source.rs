//! Ledger source abstraction.

use crate::FeedError;
use async_trait::async_trait;
use watchlist_core::{Address, TransactionFingerprint};

/// A polled source of per-address transaction history.
#[async_trait]
pub trait LedgerSource: Send + Sync {
    /// Most recent transaction involving `address`.
    ///
    /// `Ok(None)` means the source answered and the address has no
    /// transactions. Any failure to get a usable answer is an `Err`.
    async fn fetch_latest(
        &self,
        address: &Address,
    ) -> Result<Option<TransactionFingerprint>, FeedError>;

    /// Short name used in log fields.
    fn name(&self) -> &'static str;
}
