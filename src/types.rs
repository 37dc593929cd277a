//! Shared primitive IDs and registration enums.

use serde::{Deserialize, Serialize};

/// Row identifier assigned by the store.
pub type VoucherId = i64;
/// Unix timestamp in milliseconds, as persisted.
pub type EpochMs = i64;

/// Outcome of a registration call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Registration {
    /// One row was written.
    Inserted(VoucherId),
    /// An overlapping voucher with the same code already exists; nothing was written.
    Conflict,
}

impl Registration {
    /// True when a row was written.
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Registration path used by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Check, then insert in a separate statement. Races under concurrency.
    Naive,
    /// Single conditional `INSERT ... SELECT ... WHERE NOT EXISTS`.
    Atomic,
    /// Conditional insert inside a transaction holding the lock anchor.
    #[default]
    Isolated,
}
