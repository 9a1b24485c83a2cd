//! Alert notification logic.
//!
//! Delivery always happens after the alert is stored. Each send attempt is
//! counted on the alert row, and `alert_sent` is the only record of whether
//! a retry is still needed, so a crash between sending and marking can at
//! worst repeat one message (at-least-once).

use crate::config::NotifierConfig;
use crate::db::{Database, DbError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use watchlist_core::{AlertEvent, TransactionFingerprint, WatchlistEntry};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Telegram API error: {0}")]
    Telegram(#[from] teloxide::RequestError),
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

/// A channel that can tell a subscriber about a transaction.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        destination: &str,
        entry: &WatchlistEntry,
        tx: &TransactionFingerprint,
    ) -> Result<(), NotifyError>;

    /// Short name used in log fields.
    fn name(&self) -> &'static str;
}

/// What happened to one alert's notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    /// Transport failed; the alert stays pending.
    Failed,
    AlreadySent,
    /// Entry has no contact configured.
    NoDestination,
    /// Transaction is outside the entry's alert scope.
    OutOfScope,
    /// No transport configured for this process.
    Disabled,
    AttemptsExhausted,
}

impl DeliveryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryOutcome::Sent => "sent",
            DeliveryOutcome::Failed => "failed",
            DeliveryOutcome::AlreadySent => "already_sent",
            DeliveryOutcome::NoDestination => "no_destination",
            DeliveryOutcome::OutOfScope => "out_of_scope",
            DeliveryOutcome::Disabled => "disabled",
            DeliveryOutcome::AttemptsExhausted => "attempts_exhausted",
        }
    }
}

/// Totals from one pass over pending notifications.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetrySummary {
    pub attempted: u32,
    pub sent: u32,
    pub failed: u32,
}

/// Sends notifications for stored alerts and records the outcome.
pub struct AlertDispatcher {
    db: Database,
    transport: Option<Arc<dyn Notifier>>,
    config: NotifierConfig,
}

impl AlertDispatcher {
    /// Create a dispatcher. With `transport = None` alerts are only stored.
    pub fn new(db: Database, transport: Option<Arc<dyn Notifier>>, config: NotifierConfig) -> Self {
        Self {
            db,
            transport,
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// Notify the entry's subscriber about a stored alert.
    ///
    /// Transport failures are logged and reported as `Failed`; only a failure
    /// to record the attempt in the store is returned as an error.
    pub async fn deliver(
        &self,
        entry: &WatchlistEntry,
        alert: &AlertEvent,
    ) -> Result<DeliveryOutcome, DbError> {
        if alert.notification_sent {
            return Ok(DeliveryOutcome::AlreadySent);
        }
        let Some(destination) = entry.destination() else {
            return Ok(DeliveryOutcome::NoDestination);
        };
        let tx = alert.transaction();
        if !entry.wants(&tx) {
            debug!(
                entry_id = entry.id,
                scope = %entry.alert_scope,
                tx = %tx.hash,
                "Skipping notification: outside alert scope"
            );
            return Ok(DeliveryOutcome::OutOfScope);
        }
        let Some(transport) = self.transport.as_ref() else {
            return Ok(DeliveryOutcome::Disabled);
        };
        if alert.notification_attempts >= self.config.max_attempts {
            return Ok(DeliveryOutcome::AttemptsExhausted);
        }

        match transport.notify(destination, entry, &tx).await {
            Ok(()) => {
                info!(
                    transport = transport.name(),
                    entry_id = entry.id,
                    alert_id = alert.id,
                    tx = %tx.hash,
                    "Alert sent"
                );
                self.db.record_delivery_attempt(alert.id, true).await?;
                Ok(DeliveryOutcome::Sent)
            }
            Err(e) => {
                error!(
                    transport = transport.name(),
                    entry_id = entry.id,
                    alert_id = alert.id,
                    attempt = alert.notification_attempts + 1,
                    error = %e,
                    "Failed to send alert"
                );
                self.db.record_delivery_attempt(alert.id, false).await?;
                Ok(DeliveryOutcome::Failed)
            }
        }
    }

    /// Retry alerts whose notification has not gone out yet, pausing `pace`
    /// between sends.
    pub async fn retry_pending(&self, pace: Duration) -> Result<RetrySummary, DbError> {
        let mut summary = RetrySummary::default();
        if self.transport.is_none() {
            return Ok(summary);
        }

        let pending = self
            .db
            .pending_notifications(self.config.max_attempts, self.config.retry_batch_size)
            .await?;
        if pending.is_empty() {
            return Ok(summary);
        }
        info!(count = pending.len(), "Retrying pending notifications");

        for (i, alert) in pending.iter().enumerate() {
            if i > 0 && !pace.is_zero() {
                tokio::time::sleep(pace).await;
            }
            let Some(entry) = self.db.get_entry(alert.watchlist_entry_id).await? else {
                warn!(alert_id = alert.id, "Pending alert has no watchlist entry");
                continue;
            };

            summary.attempted += 1;
            match self.deliver(&entry, alert).await? {
                DeliveryOutcome::Sent => summary.sent += 1,
                DeliveryOutcome::Failed => summary.failed += 1,
                _ => {}
            }
        }

        Ok(summary)
    }
}
