//! Change detection for watched addresses.
//!
//! This crate contains the rule that decides whether a freshly fetched
//! transaction is news for a watchlist entry.

pub mod detector;

pub use detector::*;
