/// SQLite implementation of [`VoucherRepository`].
pub mod sqlite;

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::{
    types::{Registration, Strategy},
    voucher::{StoredVoucher, Voucher, VoucherError, Window},
};

/// Failure of a store call. A conflict is not an error; see [`Registration::Conflict`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Input failed validation before reaching the database.
    #[error("invalid voucher: {0}")]
    Invalid(#[from] VoucherError),
    /// Lock wait timed out or the database was locked. The transaction was rolled back.
    #[error("database busy: {0}")]
    Busy(rusqlite::Error),
    /// The lock anchor row is absent, so registrations cannot be serialized.
    #[error("lock anchor row {0} is missing")]
    MissingLockAnchor(i64),
    /// A persisted row could not be decoded.
    #[error("corrupt voucher row: {0}")]
    Corrupt(String),
    /// Any other SQLite failure: transport, constraint, statement.
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),
}

impl StoreError {
    /// True when the caller may reasonably retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        if let rusqlite::Error::FromSqlConversionFailure(..) = value {
            return Self::Corrupt(value.to_string());
        }
        match value.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => Self::Busy(value),
            _ => Self::Sqlite(value),
        }
    }
}

/// Result alias for store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence seam for voucher registration.
///
/// Implementations own all persistence; callers never see rows directly.
pub trait VoucherRepository: Send {
    /// Advisory snapshot read: does an overlapping voucher with `code` exist right now?
    ///
    /// Holds no lock. Never use the answer to gate a later write.
    fn exists(&self, code: &str, window: &Window) -> StoreResult<bool>;

    /// Check-then-insert. Not safe under concurrency.
    fn register(&mut self, voucher: &Voucher) -> StoreResult<Registration>;

    /// Single conditional insert statement.
    fn register_atomic(&mut self, voucher: &Voucher) -> StoreResult<Registration>;

    /// Conditional insert serialized behind the lock anchor.
    fn register_isolated(&mut self, voucher: &Voucher) -> StoreResult<Registration>;

    /// Every persisted voucher, in insertion order.
    fn load_all(&self) -> StoreResult<Vec<StoredVoucher>>;

    /// Dispatches to the path selected by `strategy`.
    fn register_with(&mut self, strategy: Strategy, voucher: &Voucher) -> StoreResult<Registration> {
        match strategy {
            Strategy::Naive => self.register(voucher),
            Strategy::Atomic => self.register_atomic(voucher),
            Strategy::Isolated => self.register_isolated(voucher),
        }
    }
}
