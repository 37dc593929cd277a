//! SQLite-backed voucher store.
//!
//! All three registration paths live here so they share one copy of the
//! overlap clause:
//!
//! - [`SqliteVoucherStore::register`] checks with [`SqliteVoucherStore::exists`]
//!   and inserts in a second statement. Two callers can both see "free" before
//!   either writes, leaving two overlapping rows.
//! - [`SqliteVoucherStore::register_atomic`] issues one
//!   `INSERT ... SELECT ... WHERE NOT EXISTS` in autocommit mode. No isolation
//!   level is pinned. SQLite takes its write lock at statement start, so a
//!   concurrent writer waits up to the busy timeout and then sees the first
//!   row, returning [`Registration::Conflict`]. Only when the timeout runs out
//!   does it fail with [`StoreError::Busy`]. Engines that evaluate the
//!   subquery against a snapshot before locking can still insert twice.
//! - [`SqliteVoucherStore::register_isolated`] opens a `BEGIN IMMEDIATE`
//!   transaction, bumps the lock anchor row, runs the same conditional insert
//!   and commits. Every registration against the database is totally ordered,
//!   including ones for unrelated codes.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, Row, TransactionBehavior, named_params, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    core::overlap::overlap_clause,
    types::Registration,
    voucher::{StoredVoucher, Voucher, Window},
};

use super::{StoreError, StoreResult, VoucherRepository};

/// Id of the single lock anchor row.
pub const LOCK_ANCHOR_ID: i64 = 1;

const COUNT_OVERLAPPING: &str = concat!(
    "SELECT count(*) FROM vouchers WHERE ",
    overlap_clause!()
);

const INSERT_VOUCHER: &str = "INSERT INTO vouchers(code, discount, start_ms, end_ms) \
     VALUES (:code, :discount, :start_ms, :end_ms)";

const INSERT_IF_FREE: &str = concat!(
    "INSERT INTO vouchers(code, discount, start_ms, end_ms) ",
    "SELECT :code, :discount, :start_ms, :end_ms ",
    "WHERE NOT EXISTS (SELECT 1 FROM vouchers WHERE ",
    overlap_clause!(),
    ")"
);

const ACQUIRE_ANCHOR: &str =
    "UPDATE lock_anchor SET acquisitions = acquisitions + 1 WHERE id = ?1";

const SELECT_ALL: &str =
    "SELECT id, code, discount, start_ms, end_ms FROM vouchers ORDER BY id ASC";

const SELECT_BY_CODE: &str =
    "SELECT id, code, discount, start_ms, end_ms FROM vouchers WHERE code = ?1 ORDER BY id ASC";

/// Connection settings applied on open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long a statement waits on a held lock before failing with `Busy`.
    pub busy_timeout_ms: u64,
    /// Enable WAL journaling and `synchronous=NORMAL`.
    pub wal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            wal: true,
        }
    }
}

/// SQLite implementation of [`VoucherRepository`].
///
/// One value wraps one connection. Concurrent callers open one store each
/// against the same file.
pub struct SqliteVoucherStore {
    conn: Connection,
}

impl SqliteVoucherStore {
    /// Opens or creates a store at `path` with [`StoreConfig::default`].
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with(path, &StoreConfig::default())
    }

    /// Opens or creates a store at `path`.
    pub fn open_with(path: impl AsRef<Path>, config: &StoreConfig) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let store = Self::init_connection(conn, config)?;
        info!(path = %path.display(), "opened voucher store");
        Ok(store)
    }

    /// Opens a private in-memory store.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn, &StoreConfig::default())
    }

    fn init_connection(conn: Connection, config: &StoreConfig) -> StoreResult<Self> {
        // Must precede any statement that can contend for a lock.
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        if config.wal {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
        }
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self { conn })
    }

    /// Counts vouchers with `code` whose window overlaps `window`.
    ///
    /// Snapshot read, no lock held: fine for "is this code taken right now?",
    /// useless for deciding whether a later insert is safe.
    pub fn exists(&self, code: &str, window: &Window) -> StoreResult<bool> {
        window.validate()?;
        let (start_ms, end_ms) = window.millis();
        let count: i64 = self.conn.prepare_cached(COUNT_OVERLAPPING)?.query_row(
            named_params! { ":code": code, ":start_ms": start_ms, ":end_ms": end_ms },
            |row| row.get(0),
        )?;
        Ok(count >= 1)
    }

    /// Check-then-insert baseline. Races under concurrency; see module docs.
    pub fn register(&self, voucher: &Voucher) -> StoreResult<Registration> {
        self.register_interleaved(voucher, || {})
    }

    /// [`register`](Self::register) with `after_check` run between the
    /// existence check and the insert.
    ///
    /// Lets tests hold two callers inside the race window at once.
    #[doc(hidden)]
    pub fn register_interleaved<F: FnOnce()>(
        &self,
        voucher: &Voucher,
        after_check: F,
    ) -> StoreResult<Registration> {
        let result = self.naive_insert(voucher, after_check);
        log_outcome("naive", &voucher.code, &result);
        result
    }

    /// Single-statement conditional insert. Zero rows written is
    /// [`Registration::Conflict`], not an error.
    pub fn register_atomic(&self, voucher: &Voucher) -> StoreResult<Registration> {
        let result = voucher
            .validate()
            .map_err(StoreError::from)
            .and_then(|()| insert_if_free(&self.conn, voucher));
        log_outcome("atomic", &voucher.code, &result);
        result
    }

    /// Conditional insert inside a transaction that first locks the anchor row.
    ///
    /// On any error the transaction is rolled back before returning.
    pub fn register_isolated(&mut self, voucher: &Voucher) -> StoreResult<Registration> {
        let result = self.isolated_insert(voucher);
        log_outcome("isolated", &voucher.code, &result);
        result
    }

    /// All vouchers stored under `code`, in insertion order.
    pub fn vouchers_for(&self, code: &str) -> StoreResult<Vec<StoredVoucher>> {
        let mut stmt = self.conn.prepare_cached(SELECT_BY_CODE)?;
        let rows = stmt.query_map(params![code], stored_from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Every stored voucher, in insertion order.
    pub fn load_all(&self) -> StoreResult<Vec<StoredVoucher>> {
        let mut stmt = self.conn.prepare_cached(SELECT_ALL)?;
        let rows = stmt.query_map([], stored_from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// How many isolated registrations have taken the anchor lock and committed.
    pub fn lock_acquisitions(&self) -> StoreResult<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT acquisitions FROM lock_anchor WHERE id = ?1",
            params![LOCK_ANCHOR_ID],
            |row| row.get(0),
        )?;
        u64::try_from(n)
            .map_err(|_| StoreError::Corrupt(format!("lock anchor counter is negative: {n}")))
    }

    fn naive_insert<F: FnOnce()>(
        &self,
        voucher: &Voucher,
        after_check: F,
    ) -> StoreResult<Registration> {
        voucher.validate()?;
        if self.exists(&voucher.code, &voucher.window)? {
            return Ok(Registration::Conflict);
        }

        after_check();

        let (start_ms, end_ms) = voucher.window.millis();
        self.conn.prepare_cached(INSERT_VOUCHER)?.execute(named_params! {
            ":code": voucher.code,
            ":discount": voucher.discount,
            ":start_ms": start_ms,
            ":end_ms": end_ms,
        })?;
        Ok(Registration::Inserted(self.conn.last_insert_rowid()))
    }

    fn isolated_insert(&mut self, voucher: &Voucher) -> StoreResult<Registration> {
        voucher.validate()?;

        // Dropping `tx` on any early return rolls back and releases the lock.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        if tx.execute(ACQUIRE_ANCHOR, params![LOCK_ANCHOR_ID])? == 0 {
            return Err(StoreError::MissingLockAnchor(LOCK_ANCHOR_ID));
        }
        let outcome = insert_if_free(&tx, voucher)?;
        tx.commit()?;
        Ok(outcome)
    }
}

impl VoucherRepository for SqliteVoucherStore {
    fn exists(&self, code: &str, window: &Window) -> StoreResult<bool> {
        SqliteVoucherStore::exists(self, code, window)
    }

    fn register(&mut self, voucher: &Voucher) -> StoreResult<Registration> {
        SqliteVoucherStore::register(self, voucher)
    }

    fn register_atomic(&mut self, voucher: &Voucher) -> StoreResult<Registration> {
        SqliteVoucherStore::register_atomic(self, voucher)
    }

    fn register_isolated(&mut self, voucher: &Voucher) -> StoreResult<Registration> {
        SqliteVoucherStore::register_isolated(self, voucher)
    }

    fn load_all(&self) -> StoreResult<Vec<StoredVoucher>> {
        SqliteVoucherStore::load_all(self)
    }
}

fn insert_if_free(conn: &Connection, voucher: &Voucher) -> StoreResult<Registration> {
    let (start_ms, end_ms) = voucher.window.millis();
    let written = conn.prepare_cached(INSERT_IF_FREE)?.execute(named_params! {
        ":code": voucher.code,
        ":discount": voucher.discount,
        ":start_ms": start_ms,
        ":end_ms": end_ms,
    })?;
    if written == 0 {
        return Ok(Registration::Conflict);
    }
    Ok(Registration::Inserted(conn.last_insert_rowid()))
}

fn stored_from_row(row: &Row<'_>) -> rusqlite::Result<StoredVoucher> {
    let start_ms: i64 = row.get(3)?;
    let end_ms: i64 = row.get(4)?;
    let window = Window::from_millis(start_ms, end_ms).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Integer, Box::new(err))
    })?;
    Ok(StoredVoucher {
        id: row.get(0)?,
        voucher: Voucher {
            code: row.get(1)?,
            discount: row.get(2)?,
            window,
        },
    })
}

fn log_outcome(path: &str, code: &str, result: &StoreResult<Registration>) {
    match result {
        Ok(Registration::Inserted(id)) => debug!(path, code, id, "voucher registered"),
        Ok(Registration::Conflict) => debug!(path, code, "overlapping voucher exists, nothing written"),
        Err(err) if err.is_retryable() => warn!(path, code, error = %err, "registration hit a held lock"),
        Err(err) => warn!(path, code, error = %err, "registration failed"),
    }
}
