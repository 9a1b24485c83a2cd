//! Core data types for the watchlist monitor.

pub mod address;
pub mod alert;
pub mod amount;
pub mod chain;
pub mod error;
pub mod transaction;
pub mod watchlist;

pub use address::*;
pub use alert::*;
pub use amount::*;
pub use chain::*;
pub use error::*;
pub use transaction::*;
pub use watchlist::*;
