//! SQLite store shared between the monitor and the watchlist API.
//!
//! Every operation goes through the configured [`RetryPolicy`], and the
//! connection is opened in WAL mode with a busy timeout so that both
//! processes can use the same database file.

use crate::config::StoreConfig;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};
use watchlist_core::{
    Address, AlertEvent, AlertScope, CoreError, TransactionFingerprint, WatchlistEntry, Wei,
};

/// Largest page `list_alerts` will return.
pub const MAX_ALERT_PAGE: u32 = 100;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Watchlist entry not found: {0}")]
    EntryNotFound(i64),
    #[error("Address {address} is already on the watchlist for this contact")]
    DuplicateEntry { address: String },
    #[error("Checkpoint of entry {0} was moved by another writer")]
    CheckpointConflict(i64),
    #[error("Invalid stored value: {0}")]
    Corrupt(String),
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: Box<DbError>,
    },
}

impl From<CoreError> for DbError {
    fn from(err: CoreError) -> Self {
        DbError::Corrupt(err.to_string())
    }
}

impl DbError {
    /// SQLite reported the database busy or locked, or no pooled connection
    /// became free in time. Worth retrying after a short pause.
    pub fn is_contention(&self) -> bool {
        match self {
            DbError::Sqlx(sqlx::Error::PoolTimedOut) => true,
            DbError::Sqlx(sqlx::Error::Database(db_err)) => db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                // Low byte is the primary result code: 5 = BUSY, 6 = LOCKED.
                .map(|code| matches!(code & 0xff, 5 | 6))
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Result of the atomic record-and-advance operation.
#[derive(Debug, Clone)]
pub struct RecordedAlert {
    pub alert: AlertEvent,
    /// False when an alert for this `(entry, tx)` pair already existed.
    pub newly_recorded: bool,
    /// False when the transaction is older than the current checkpoint.
    pub checkpoint_advanced: bool,
}

#[derive(sqlx::FromRow)]
struct WatchlistRow {
    id: i64,
    address: String,
    user_email: String,
    alert_type: String,
    is_active: bool,
    last_tx_hash: Option<String>,
    last_checked: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<WatchlistRow> for WatchlistEntry {
    type Error = DbError;

    fn try_from(row: WatchlistRow) -> Result<Self, Self::Error> {
        Ok(WatchlistEntry {
            id: row.id,
            address: Address::parse(&row.address)?,
            subscriber_contact: Some(row.user_email).filter(|c| !c.is_empty()),
            alert_scope: row.alert_type.parse::<AlertScope>()?,
            is_active: row.is_active,
            last_checkpoint: row.last_tx_hash,
            last_checked_at: row.last_checked,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: i64,
    watchlist_id: i64,
    address: String,
    tx_hash: String,
    from_address: String,
    to_address: Option<String>,
    value: String,
    timestamp: DateTime<Utc>,
    block_number: i64,
    created_at: DateTime<Utc>,
    alert_sent: bool,
    notification_attempts: i64,
}

impl TryFrom<AlertRow> for AlertEvent {
    type Error = DbError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        Ok(AlertEvent {
            id: row.id,
            watchlist_entry_id: row.watchlist_id,
            address: Address::parse(&row.address)?,
            tx_hash: row.tx_hash,
            counterparty_from: Address::parse(&row.from_address)?,
            counterparty_to: row.to_address.as_deref().map(Address::parse).transpose()?,
            value: Wei::from_display(&row.value)?,
            tx_timestamp: row.timestamp,
            block_number: u64::try_from(row.block_number)
                .map_err(|_| DbError::Corrupt(format!("block_number {}", row.block_number)))?,
            created_at: row.created_at,
            notification_sent: row.alert_sent,
            notification_attempts: u32::try_from(row.notification_attempts).unwrap_or(u32::MAX),
        })
    }
}

const WATCHLIST_COLUMNS: &str =
    "id, address, user_email, alert_type, is_active, last_tx_hash, last_checked, created_at";

const ALERT_COLUMNS: &str = "id, watchlist_id, address, tx_hash, from_address, to_address, value, \
     timestamp, block_number, created_at, alert_sent, notification_attempts";

/// Database connection for the watchlist and its alerts.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl Database {
    /// Connect to SQLite database at the given URL with default settings.
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        Self::connect_with(&StoreConfig::new(database_url)).await
    }

    /// Connect with explicit pool, locking and retry settings.
    pub async fn connect_with(config: &StoreConfig) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;

        let db = Self {
            pool,
            retry: config.retry,
        };
        db.retry.run("migrate", || db.run_migrations()).await?;
        info!(url = %config.database_url, "Connected to watchlist store");
        Ok(db)
    }

    /// Underlying pool, for tooling and tests.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all pooled connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create tables and indexes if they do not exist yet.
    async fn run_migrations(&self) -> Result<(), DbError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS watchlist (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL,
                user_email TEXT NOT NULL DEFAULT '',
                alert_type TEXT NOT NULL DEFAULT 'all',
                is_active INTEGER NOT NULL DEFAULT 1,
                last_tx_hash TEXT,
                last_checked TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_watchlist_address_contact
            ON watchlist(address, user_email)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                watchlist_id INTEGER NOT NULL REFERENCES watchlist(id),
                address TEXT NOT NULL,
                tx_hash TEXT NOT NULL,
                from_address TEXT NOT NULL,
                to_address TEXT,
                value TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                block_number INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                alert_sent INTEGER NOT NULL DEFAULT 0,
                notification_attempts INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_entry_tx
            ON alerts(watchlist_id, tx_hash)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_alerts_entry_recent
            ON alerts(watchlist_id, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Monitor operations
    // ------------------------------------------------------------------

    /// All entries with `is_active = 1`, in id order.
    pub async fn active_entries(&self) -> Result<Vec<WatchlistEntry>, DbError> {
        self.retry
            .run("active_entries", || self.try_active_entries())
            .await
    }

    async fn try_active_entries(&self) -> Result<Vec<WatchlistEntry>, DbError> {
        let rows = sqlx::query_as::<_, WatchlistRow>(&format!(
            "SELECT {} FROM watchlist WHERE is_active = 1 ORDER BY id",
            WATCHLIST_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WatchlistEntry::try_from).collect()
    }

    /// Insert the alert for `tx` and advance the entry's checkpoint to it, as
    /// one transaction.
    ///
    /// The checkpoint only moves if it still holds the value `entry` was read
    /// with; otherwise nothing is written and `CheckpointConflict` is returned.
    /// If the alert already exists it is returned with `newly_recorded = false`.
    pub async fn record_change(
        &self,
        entry: &WatchlistEntry,
        tx: &TransactionFingerprint,
    ) -> Result<RecordedAlert, DbError> {
        self.retry
            .run("record_change", || self.try_record_change(entry, tx))
            .await
    }

    async fn try_record_change(
        &self,
        entry: &WatchlistEntry,
        tx: &TransactionFingerprint,
    ) -> Result<RecordedAlert, DbError> {
        let now = Utc::now();
        let mut db_tx = self.pool.begin().await?;

        // Write first so the transaction takes the write lock before reading.
        let inserted = sqlx::query(
            r#"
            INSERT INTO alerts (watchlist_id, address, tx_hash, from_address, to_address,
                                value, timestamp, block_number, created_at, alert_sent)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(watchlist_id, tx_hash) DO NOTHING
            "#,
        )
        .bind(entry.id)
        .bind(entry.address.as_str())
        .bind(&tx.hash)
        .bind(tx.from.as_str())
        .bind(tx.to.as_ref().map(Address::as_str))
        .bind(tx.value.to_display())
        .bind(tx.timestamp)
        .bind(i64::try_from(tx.block_number).unwrap_or(i64::MAX))
        .bind(now)
        .execute(&mut *db_tx)
        .await?
        .rows_affected();

        // A re-observed alert from an older block than the checkpoint must
        // not move the checkpoint backwards.
        let mut move_checkpoint = true;
        if inserted == 0 {
            if let Some(current) = entry.last_checkpoint.as_deref() {
                let current_block: Option<i64> = sqlx::query_scalar(
                    "SELECT block_number FROM alerts WHERE watchlist_id = ? AND tx_hash = ?",
                )
                .bind(entry.id)
                .bind(current)
                .fetch_optional(&mut *db_tx)
                .await?;
                move_checkpoint = current_block
                    .map_or(true, |block| block <= i64::try_from(tx.block_number).unwrap_or(i64::MAX));
            }
        }

        let checkpoint = if move_checkpoint {
            Some(tx.hash.as_str())
        } else {
            entry.last_checkpoint.as_deref()
        };
        let updated = sqlx::query(
            r#"
            UPDATE watchlist SET last_tx_hash = ?, last_checked = ?
            WHERE id = ? AND last_tx_hash IS ?
            "#,
        )
        .bind(checkpoint)
        .bind(now)
        .bind(entry.id)
        .bind(entry.last_checkpoint.as_deref())
        .execute(&mut *db_tx)
        .await?
        .rows_affected();

        if updated == 0 {
            db_tx.rollback().await?;
            return Err(DbError::CheckpointConflict(entry.id));
        }

        let row = sqlx::query_as::<_, AlertRow>(&format!(
            "SELECT {} FROM alerts WHERE watchlist_id = ? AND tx_hash = ?",
            ALERT_COLUMNS
        ))
        .bind(entry.id)
        .bind(&tx.hash)
        .fetch_one(&mut *db_tx)
        .await?;

        db_tx.commit().await?;

        let alert = AlertEvent::try_from(row)?;
        debug!(
            entry_id = entry.id,
            alert_id = alert.id,
            tx = %tx.hash,
            newly_recorded = inserted == 1,
            checkpoint_advanced = move_checkpoint,
            "Recorded alert"
        );
        Ok(RecordedAlert {
            alert,
            newly_recorded: inserted == 1,
            checkpoint_advanced: move_checkpoint,
        })
    }

    /// Refresh `last_checked` without touching the checkpoint.
    pub async fn update_last_checked(&self, entry_id: i64) -> Result<(), DbError> {
        self.retry
            .run("update_last_checked", || self.try_update_last_checked(entry_id))
            .await
    }

    async fn try_update_last_checked(&self, entry_id: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE watchlist SET last_checked = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Count one delivery attempt; set `alert_sent` if it succeeded.
    /// `alert_sent` never goes back to 0.
    pub async fn record_delivery_attempt(
        &self,
        alert_id: i64,
        delivered: bool,
    ) -> Result<(), DbError> {
        self.retry
            .run("record_delivery_attempt", || {
                self.try_record_delivery_attempt(alert_id, delivered)
            })
            .await
    }

    async fn try_record_delivery_attempt(
        &self,
        alert_id: i64,
        delivered: bool,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE alerts
            SET notification_attempts = notification_attempts + 1,
                alert_sent = MAX(alert_sent, ?)
            WHERE id = ?
            "#,
        )
        .bind(delivered)
        .bind(alert_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Undelivered alerts still worth retrying: entry active with a contact,
    /// attempts below `max_attempts`, and the transaction inside the entry's
    /// alert scope. Oldest first.
    pub async fn pending_notifications(
        &self,
        max_attempts: u32,
        limit: u32,
    ) -> Result<Vec<AlertEvent>, DbError> {
        self.retry
            .run("pending_notifications", || {
                self.try_pending_notifications(max_attempts, limit)
            })
            .await
    }

    async fn try_pending_notifications(
        &self,
        max_attempts: u32,
        limit: u32,
    ) -> Result<Vec<AlertEvent>, DbError> {
        let rows = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT a.id, a.watchlist_id, a.address, a.tx_hash, a.from_address, a.to_address,
                   a.value, a.timestamp, a.block_number, a.created_at, a.alert_sent,
                   a.notification_attempts
            FROM alerts a
            JOIN watchlist w ON w.id = a.watchlist_id
            WHERE a.alert_sent = 0
              AND a.notification_attempts < ?
              AND w.is_active = 1
              AND w.user_email <> ''
              AND (
                    w.alert_type = 'all'
                 OR (w.alert_type = 'incoming' AND a.to_address = w.address)
                 OR (w.alert_type = 'outgoing' AND a.from_address = w.address)
              )
            ORDER BY a.created_at, a.id
            LIMIT ?
            "#,
        )
        .bind(i64::from(max_attempts))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AlertEvent::try_from).collect()
    }

    // ------------------------------------------------------------------
    // Watchlist management operations (used by the API process)
    // ------------------------------------------------------------------

    /// Add an address to the watchlist. A second entry for the same
    /// `(address, contact)` pair is rejected, whether or not the first one is
    /// still active.
    pub async fn add_entry(
        &self,
        address: &Address,
        contact: Option<&str>,
        scope: AlertScope,
    ) -> Result<WatchlistEntry, DbError> {
        let contact = contact.map(str::trim).unwrap_or_default().to_string();
        self.retry
            .run("add_entry", || self.try_add_entry(address, &contact, scope))
            .await
    }

    async fn try_add_entry(
        &self,
        address: &Address,
        contact: &str,
        scope: AlertScope,
    ) -> Result<WatchlistEntry, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO watchlist (address, user_email, alert_type, is_active, created_at)
            VALUES (?, ?, ?, 1, ?)
            "#,
        )
        .bind(address.as_str())
        .bind(contact)
        .bind(scope.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        let id = match result {
            Ok(done) => done.last_insert_rowid(),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(DbError::DuplicateEntry {
                    address: address.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        self.try_get_entry(id)
            .await?
            .ok_or(DbError::EntryNotFound(id))
    }

    pub async fn get_entry(&self, id: i64) -> Result<Option<WatchlistEntry>, DbError> {
        self.retry.run("get_entry", || self.try_get_entry(id)).await
    }

    async fn try_get_entry(&self, id: i64) -> Result<Option<WatchlistEntry>, DbError> {
        sqlx::query_as::<_, WatchlistRow>(&format!(
            "SELECT {} FROM watchlist WHERE id = ?",
            WATCHLIST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(WatchlistEntry::try_from)
        .transpose()
    }

    /// Soft delete: the entry and its alerts stay, the monitor skips it.
    pub async fn deactivate_entry(&self, id: i64) -> Result<(), DbError> {
        self.retry
            .run("deactivate_entry", || self.try_set_active(id, false))
            .await
    }

    pub async fn reactivate_entry(&self, id: i64) -> Result<(), DbError> {
        self.retry
            .run("reactivate_entry", || self.try_set_active(id, true))
            .await
    }

    async fn try_set_active(&self, id: i64, active: bool) -> Result<(), DbError> {
        let updated = sqlx::query("UPDATE watchlist SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(DbError::EntryNotFound(id));
        }
        Ok(())
    }

    /// Alerts of one entry, most recent first, at most [`MAX_ALERT_PAGE`].
    pub async fn list_alerts(&self, watchlist_id: i64, limit: u32) -> Result<Vec<AlertEvent>, DbError> {
        let limit = limit.min(MAX_ALERT_PAGE);
        self.retry
            .run("list_alerts", || self.try_list_alerts(watchlist_id, limit))
            .await
    }

    async fn try_list_alerts(&self, watchlist_id: i64, limit: u32) -> Result<Vec<AlertEvent>, DbError> {
        let rows = sqlx::query_as::<_, AlertRow>(&format!(
            "SELECT {} FROM alerts WHERE watchlist_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
            ALERT_COLUMNS
        ))
        .bind(watchlist_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AlertEvent::try_from).collect()
    }

    pub async fn alert_count(&self, watchlist_id: i64) -> Result<i64, DbError> {
        self.retry
            .run("alert_count", || async move {
                let count = sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM alerts WHERE watchlist_id = ?",
                )
                .bind(watchlist_id)
                .fetch_one(&self.pool)
                .await?;
                Ok(count)
            })
            .await
    }
}
