//! Ledger data source polling.
//!
//! This crate provides the fetcher that asks an external block explorer for
//! the most recent transaction of a watched address.
//!
//! ## Architecture
//!
//! - `source` - The `LedgerSource` trait the monitor loop polls through
//! - `etherscan` - Etherscan v2 REST implementation and response parsing
//! - `error` - `FeedError` and its transient/permanent classification

pub mod error;
pub mod etherscan;
pub mod source;

pub use error::*;
pub use etherscan::*;
pub use source::*;
