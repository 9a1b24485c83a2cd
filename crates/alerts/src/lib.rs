//! Alert persistence and delivery for the watchlist monitor.
//!
//! This crate provides:
//! - The SQLite store shared with the watchlist management process
//! - Bounded retry for store operations that hit lock contention
//! - Notification delivery with per-alert attempt tracking
//! - A Telegram transport

pub mod config;
pub mod db;
pub mod notifier;
pub mod retry;
pub mod telegram;

pub use config::{NotifierConfig, StoreConfig};
pub use db::{Database, DbError, RecordedAlert, MAX_ALERT_PAGE};
pub use notifier::{AlertDispatcher, DeliveryOutcome, Notifier, NotifyError, RetrySummary};
pub use retry::RetryPolicy;
pub use telegram::{format_alert_message, TelegramNotifier};
