//! Watchlist run loop.
//!
//! One sequential pass over the active entries per cycle. Each entry is
//! fetched, compared with its checkpoint, recorded if new, and notified.
//! Failures are contained at entry and cycle granularity; only the shutdown
//! signal ends the loop.

use crate::config::LoopSettings;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use watchlist_alerts::{AlertDispatcher, Database, DbError, DeliveryOutcome, RetrySummary};
use watchlist_core::WatchlistEntry;
use watchlist_engine::{detect, Detection};
use watchlist_feeds::{FeedError, LedgerSource};

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Store error: {0}")]
    Store(#[from] DbError),
}

/// What processing one entry produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    NoData,
    /// The fetch failed; handled like `NoData`.
    FetchFailed { retry_after: Option<Duration> },
    Unchanged,
    Alerted {
        newly_recorded: bool,
        delivery: DeliveryOutcome,
    },
}

/// Counters for one cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub checked: u32,
    pub new_alerts: u32,
    pub unchanged: u32,
    pub no_data: u32,
    pub fetch_failures: u32,
    pub failures: u32,
    pub notified: u32,
    pub retried: RetrySummary,
}

impl CycleReport {
    fn record(&mut self, outcome: EntryOutcome) {
        match outcome {
            EntryOutcome::NoData => self.no_data += 1,
            EntryOutcome::FetchFailed { .. } => {
                self.no_data += 1;
                self.fetch_failures += 1;
            }
            EntryOutcome::Unchanged => self.unchanged += 1,
            EntryOutcome::Alerted {
                newly_recorded,
                delivery,
            } => {
                if newly_recorded {
                    self.new_alerts += 1;
                }
                if delivery == DeliveryOutcome::Sent {
                    self.notified += 1;
                }
            }
        }
    }
}

pub struct Monitor {
    source: Arc<dyn LedgerSource>,
    db: Database,
    dispatcher: AlertDispatcher,
    settings: LoopSettings,
}

impl Monitor {
    pub fn new(
        source: Arc<dyn LedgerSource>,
        db: Database,
        dispatcher: AlertDispatcher,
        settings: LoopSettings,
    ) -> Self {
        Self {
            source,
            db,
            dispatcher,
            settings,
        }
    }

    /// Run cycles until `shutdown` turns true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            source = self.source.name(),
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            notifications = self.dispatcher.is_enabled(),
            "Monitor started"
        );

        while !stopping(&shutdown) {
            let wait = match AssertUnwindSafe(self.run_cycle(&shutdown))
                .catch_unwind()
                .await
            {
                Ok(Ok(report)) => {
                    info!(
                        checked = report.checked,
                        new_alerts = report.new_alerts,
                        unchanged = report.unchanged,
                        no_data = report.no_data,
                        fetch_failures = report.fetch_failures,
                        failures = report.failures,
                        notified = report.notified,
                        retried_sent = report.retried.sent,
                        "Cycle complete"
                    );
                    self.settings.poll_interval
                }
                Ok(Err(e)) => {
                    error!(
                        error = %e,
                        cooldown_secs = self.settings.error_cooldown.as_secs(),
                        "Cycle failed"
                    );
                    self.settings.error_cooldown
                }
                Err(panic) => {
                    error!(
                        panic = panic_message(panic.as_ref()),
                        cooldown_secs = self.settings.error_cooldown.as_secs(),
                        "Cycle panicked"
                    );
                    self.settings.error_cooldown
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Monitor stopped");
    }

    /// One pass: retry pending notifications, then check every active entry.
    pub async fn run_cycle(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<CycleReport, MonitorError> {
        let mut report = CycleReport::default();

        match self
            .dispatcher
            .retry_pending(self.settings.rate_limit_delay)
            .await
        {
            Ok(summary) => report.retried = summary,
            Err(e) => warn!(error = %e, "Pending notification retry failed"),
        }

        let entries = self.db.active_entries().await?;
        if entries.is_empty() {
            info!("No active watchlist entries");
            return Ok(report);
        }
        info!(entries = entries.len(), "Checking watchlist");

        let mut pause = Duration::ZERO;
        for entry in &entries {
            if stopping(shutdown) {
                info!("Shutdown requested, ending cycle early");
                break;
            }
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            pause = self.settings.rate_limit_delay;

            report.checked += 1;
            match AssertUnwindSafe(self.process_entry(entry))
                .catch_unwind()
                .await
            {
                Ok(Ok(outcome)) => {
                    if let EntryOutcome::FetchFailed {
                        retry_after: Some(hint),
                    } = outcome
                    {
                        pause = pause.max(hint);
                    }
                    report.record(outcome);
                }
                Ok(Err(e)) => {
                    report.failures += 1;
                    warn!(
                        entry_id = entry.id,
                        address = %entry.address,
                        error = %e,
                        "Entry check failed"
                    );
                }
                Err(panic) => {
                    report.failures += 1;
                    error!(
                        entry_id = entry.id,
                        address = %entry.address,
                        panic = panic_message(panic.as_ref()),
                        "Entry check panicked"
                    );
                }
            }
        }

        Ok(report)
    }

    async fn process_entry(&self, entry: &WatchlistEntry) -> Result<EntryOutcome, MonitorError> {
        debug!(entry_id = entry.id, address = %entry.address.short(), "Checking entry");
        let fetched = match self.source.fetch_latest(&entry.address).await {
            Ok(fetched) => fetched,
            Err(e) => {
                log_fetch_error(entry, &e);
                self.db.update_last_checked(entry.id).await?;
                return Ok(EntryOutcome::FetchFailed {
                    retry_after: e.suggested_retry_delay(),
                });
            }
        };

        let tx = match detect(entry, fetched) {
            Detection::New(tx) => tx,
            Detection::NoData => {
                self.db.update_last_checked(entry.id).await?;
                return Ok(EntryOutcome::NoData);
            }
            Detection::Unchanged => {
                self.db.update_last_checked(entry.id).await?;
                return Ok(EntryOutcome::Unchanged);
            }
        };

        info!(
            entry_id = entry.id,
            address = %entry.address,
            tx = %tx.hash,
            direction = ?tx.direction_for(&entry.address),
            value = %tx.value,
            "New transaction detected"
        );

        let recorded = self.db.record_change(entry, &tx).await?;
        if !recorded.newly_recorded {
            debug!(
                entry_id = entry.id,
                alert_id = recorded.alert.id,
                checkpoint_advanced = recorded.checkpoint_advanced,
                "Alert already recorded for this transaction"
            );
        }

        // The alert is already stored; a failure here only leaves it pending.
        let delivery = match self.dispatcher.deliver(entry, &recorded.alert).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    entry_id = entry.id,
                    alert_id = recorded.alert.id,
                    error = %e,
                    "Could not record notification attempt"
                );
                DeliveryOutcome::Failed
            }
        };
        debug!(
            entry_id = entry.id,
            alert_id = recorded.alert.id,
            outcome = delivery.as_str(),
            "Notification handled"
        );

        Ok(EntryOutcome::Alerted {
            newly_recorded: recorded.newly_recorded,
            delivery,
        })
    }
}

fn log_fetch_error(entry: &WatchlistEntry, e: &FeedError) {
    if e.is_transient() {
        warn!(
            entry_id = entry.id,
            address = %entry.address,
            error = %e,
            "Fetch failed, treating as no data"
        );
    } else {
        error!(
            entry_id = entry.id,
            address = %entry.address,
            error = %e,
            "Fetch failed permanently, check the explorer configuration"
        );
    }
}

fn stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use watchlist_alerts::{Notifier, NotifierConfig, NotifyError};
    use watchlist_core::{Address, AlertScope, TransactionFingerprint, Wei};

    const WATCHED: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const SECOND: &str = "0xcccccccccccccccccccccccccccccccccccccccc";
    const OTHER: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[derive(Clone)]
    enum Reply {
        Latest(Option<TransactionFingerprint>),
        Timeout,
        BadEndpoint,
        Panic,
    }

    /// Ledger source answering from a per-address script.
    #[derive(Default)]
    struct ScriptedSource {
        replies: Mutex<HashMap<String, Reply>>,
    }

    impl ScriptedSource {
        fn set(&self, address: &str, reply: Reply) {
            self.replies
                .lock()
                .unwrap()
                .insert(address.to_string(), reply);
        }
    }

    #[async_trait]
    impl LedgerSource for ScriptedSource {
        async fn fetch_latest(
            &self,
            address: &Address,
        ) -> Result<Option<TransactionFingerprint>, FeedError> {
            let reply = self
                .replies
                .lock()
                .unwrap()
                .get(address.as_str())
                .cloned()
                .unwrap_or(Reply::Latest(None));
            match reply {
                Reply::Latest(tx) => Ok(tx),
                Reply::Timeout => Err(FeedError::Timeout("operation timed out".into())),
                Reply::BadEndpoint => Err(FeedError::InvalidEndpoint("relative URL".into())),
                Reply::Panic => panic!("source exploded"),
            }
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
        failing: AtomicBool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            _destination: &str,
            _entry: &WatchlistEntry,
            tx: &TransactionFingerprint,
        ) -> Result<(), NotifyError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(NotifyError::Transport("unreachable".into()));
            }
            self.sent.lock().unwrap().push(tx.hash.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn incoming(hash: &str, to: &str) -> TransactionFingerprint {
        TransactionFingerprint {
            hash: hash.into(),
            from: Address::parse(OTHER).unwrap(),
            to: Some(Address::parse(to).unwrap()),
            value: Wei(2 * Wei::SCALE),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            block_number: 18_000_000,
        }
    }

    struct Harness {
        db: Database,
        source: Arc<ScriptedSource>,
        notifier: Arc<RecordingNotifier>,
        monitor: Monitor,
    }

    async fn harness() -> Harness {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let source = Arc::new(ScriptedSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = AlertDispatcher::new(
            db.clone(),
            Some(notifier.clone()),
            NotifierConfig::default(),
        );
        let settings = LoopSettings {
            poll_interval: Duration::from_secs(3600),
            rate_limit_delay: Duration::ZERO,
            error_cooldown: Duration::from_secs(3600),
        };
        let monitor = Monitor::new(source.clone(), db.clone(), dispatcher, settings);
        Harness {
            db,
            source,
            notifier,
            monitor,
        }
    }

    async fn watch(db: &Database, address: &str, contact: Option<&str>, scope: AlertScope) -> i64 {
        db.add_entry(&Address::parse(address).unwrap(), contact, scope)
            .await
            .unwrap()
            .id
    }

    fn running() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn test_first_observation_idempotence_and_advance() {
        let h = harness().await;
        let id = watch(&h.db, WATCHED, Some("42"), AlertScope::All).await;
        let rx = running();

        h.source.set(WATCHED, Reply::Latest(Some(incoming("0xt1", WATCHED))));
        let report = h.monitor.run_cycle(&rx).await.unwrap();
        assert_eq!(report.new_alerts, 1);
        assert_eq!(report.notified, 1);
        let entry = h.db.get_entry(id).await.unwrap().unwrap();
        assert_eq!(entry.last_checkpoint.as_deref(), Some("0xt1"));

        let report = h.monitor.run_cycle(&rx).await.unwrap();
        assert_eq!(report.new_alerts, 0);
        assert_eq!(report.unchanged, 1);
        assert_eq!(h.db.alert_count(id).await.unwrap(), 1);
        let entry = h.db.get_entry(id).await.unwrap().unwrap();
        assert!(entry.last_checked_at.is_some());

        h.source.set(WATCHED, Reply::Latest(Some(incoming("0xt2", WATCHED))));
        let report = h.monitor.run_cycle(&rx).await.unwrap();
        assert_eq!(report.new_alerts, 1);
        let entry = h.db.get_entry(id).await.unwrap().unwrap();
        assert_eq!(entry.last_checkpoint.as_deref(), Some("0xt2"));

        let alerts = h.db.list_alerts(id, 10).await.unwrap();
        let hashes: Vec<_> = alerts.iter().map(|a| a.tx_hash.as_str()).collect();
        assert_eq!(hashes, vec!["0xt2", "0xt1"]);
        assert_eq!(h.notifier.sent.lock().unwrap().clone(), vec!["0xt1", "0xt2"]);
    }

    #[tokio::test]
    async fn test_timeout_leaves_entry_untouched() {
        let h = harness().await;
        let ok = watch(&h.db, WATCHED, Some("42"), AlertScope::All).await;
        let slow = watch(&h.db, SECOND, Some("42"), AlertScope::All).await;
        h.source.set(WATCHED, Reply::Latest(Some(incoming("0xt1", WATCHED))));
        h.source.set(SECOND, Reply::Timeout);

        let report = h.monitor.run_cycle(&running()).await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.failures, 0);
        assert_eq!(report.fetch_failures, 1);
        assert_eq!(report.no_data, 1);
        assert_eq!(report.new_alerts, 1);

        let entry = h.db.get_entry(slow).await.unwrap().unwrap();
        assert_eq!(entry.last_checkpoint, None);
        assert!(entry.last_checked_at.is_some());
        assert_eq!(h.db.alert_count(slow).await.unwrap(), 0);
        assert_eq!(h.db.alert_count(ok).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_existing_checkpoint() {
        let h = harness().await;
        let id = watch(&h.db, WATCHED, Some("42"), AlertScope::All).await;
        let rx = running();
        h.source.set(WATCHED, Reply::Latest(Some(incoming("0xt1", WATCHED))));
        h.monitor.run_cycle(&rx).await.unwrap();
        let before = h.db.get_entry(id).await.unwrap().unwrap();

        for reply in [Reply::Timeout, Reply::BadEndpoint] {
            h.source.set(WATCHED, reply);
            let report = h.monitor.run_cycle(&rx).await.unwrap();
            assert_eq!(report.fetch_failures, 1);
            assert_eq!(report.no_data, 1);
            assert_eq!(report.failures, 0);
        }

        let after = h.db.get_entry(id).await.unwrap().unwrap();
        assert_eq!(after.last_checkpoint.as_deref(), Some("0xt1"));
        assert!(after.last_checked_at >= before.last_checked_at);
        assert_eq!(h.db.alert_count(id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_no_data_keeps_checkpoint() {
        let h = harness().await;
        let id = watch(&h.db, WATCHED, Some("42"), AlertScope::All).await;

        let report = h.monitor.run_cycle(&running()).await.unwrap();
        assert_eq!(report.no_data, 1);

        let entry = h.db.get_entry(id).await.unwrap().unwrap();
        assert_eq!(entry.last_checkpoint, None);
        assert!(entry.last_checked_at.is_some());
        assert_eq!(h.db.alert_count(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_notification_is_retried_next_cycle() {
        let h = harness().await;
        let id = watch(&h.db, WATCHED, Some("42"), AlertScope::All).await;
        let rx = running();
        h.source.set(WATCHED, Reply::Latest(Some(incoming("0xt1", WATCHED))));
        h.notifier.failing.store(true, Ordering::SeqCst);

        let report = h.monitor.run_cycle(&rx).await.unwrap();
        assert_eq!(report.new_alerts, 1);
        assert_eq!(report.notified, 0);
        let entry = h.db.get_entry(id).await.unwrap().unwrap();
        assert_eq!(entry.last_checkpoint.as_deref(), Some("0xt1"));
        assert!(!h.db.list_alerts(id, 1).await.unwrap()[0].notification_sent);

        h.notifier.failing.store(false, Ordering::SeqCst);
        let report = h.monitor.run_cycle(&rx).await.unwrap();
        assert_eq!(report.retried.sent, 1);
        assert_eq!(report.new_alerts, 0);

        let alert = &h.db.list_alerts(id, 1).await.unwrap()[0];
        assert!(alert.notification_sent);
        assert_eq!(alert.notification_attempts, 2);
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unnotified_alerts_still_recorded() {
        let h = harness().await;
        let silent = watch(&h.db, WATCHED, None, AlertScope::All).await;
        let outgoing_only = watch(&h.db, SECOND, Some("42"), AlertScope::Outgoing).await;
        h.source.set(WATCHED, Reply::Latest(Some(incoming("0xt1", WATCHED))));
        h.source.set(SECOND, Reply::Latest(Some(incoming("0xt9", SECOND))));

        let report = h.monitor.run_cycle(&running()).await.unwrap();
        assert_eq!(report.new_alerts, 2);
        assert_eq!(report.notified, 0);
        assert!(h.notifier.sent.lock().unwrap().is_empty());

        for id in [silent, outgoing_only] {
            assert_eq!(h.db.alert_count(id).await.unwrap(), 1);
            let entry = h.db.get_entry(id).await.unwrap().unwrap();
            assert!(entry.last_checkpoint.is_some());
        }

        // Neither alert is eligible for a retry.
        let report = h.monitor.run_cycle(&running()).await.unwrap();
        assert_eq!(report.retried, RetrySummary::default());
    }

    #[tokio::test]
    async fn test_panicking_entry_does_not_abort_cycle() {
        let h = harness().await;
        let broken = watch(&h.db, SECOND, Some("42"), AlertScope::All).await;
        let ok = watch(&h.db, WATCHED, Some("42"), AlertScope::All).await;
        h.source.set(SECOND, Reply::Panic);
        h.source.set(WATCHED, Reply::Latest(Some(incoming("0xt1", WATCHED))));

        let report = h.monitor.run_cycle(&running()).await.unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(report.new_alerts, 1);
        assert_eq!(h.db.alert_count(broken).await.unwrap(), 0);
        assert_eq!(h.db.alert_count(ok).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_inactive_and_empty_watchlist() {
        let h = harness().await;
        let report = h.monitor.run_cycle(&running()).await.unwrap();
        assert_eq!(report, CycleReport::default());

        let id = watch(&h.db, WATCHED, Some("42"), AlertScope::All).await;
        h.db.deactivate_entry(id).await.unwrap();
        h.source.set(WATCHED, Reply::Latest(Some(incoming("0xt1", WATCHED))));
        let report = h.monitor.run_cycle(&running()).await.unwrap();
        assert_eq!(report.checked, 0);
        assert_eq!(h.db.alert_count(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness().await;
        let id = watch(&h.db, WATCHED, Some("42"), AlertScope::All).await;
        h.source.set(WATCHED, Reply::Latest(Some(incoming("0xt1", WATCHED))));

        let (tx, rx) = watch::channel(false);
        let stop = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send(true).unwrap();
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(h.monitor.run(rx), stop)
        })
        .await
        .expect("monitor did not stop");

        assert_eq!(h.db.alert_count(id).await.unwrap(), 1);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
