//! Voucher domain record and validity window types.

use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    core::overlap::overlaps,
    types::{EpochMs, VoucherId},
};

/// Rejected voucher input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VoucherError {
    /// The window ends before it starts.
    #[error("window start {start} is after end {end}")]
    InvertedWindow {
        /// Requested start.
        start: DateTime<Utc>,
        /// Requested end.
        end: DateTime<Utc>,
    },
    /// Discount is negative, NaN or infinite.
    #[error("discount must be finite and non-negative, got {0}")]
    InvalidDiscount(f64),
    /// A persisted millisecond value does not map to a calendar instant.
    #[error("timestamp {0}ms is out of range")]
    TimestampOutOfRange(EpochMs),
}

/// Closed validity interval `[start, end]`.
///
/// Comparison happens at millisecond precision, which is the precision the
/// store persists, so an in-memory check and the SQL clause always agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Inclusive end.
    pub end: DateTime<Utc>,
}

impl Window {
    /// Builds a window truncated to millisecond precision, rejecting
    /// `start > end` after truncation. Zero-length windows are allowed.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, VoucherError> {
        let window = Self {
            start: start.trunc_subsecs(3),
            end: end.trunc_subsecs(3),
        };
        window.validate()?;
        Ok(window)
    }

    /// Rebuilds a window from persisted millisecond bounds.
    pub fn from_millis(start_ms: EpochMs, end_ms: EpochMs) -> Result<Self, VoucherError> {
        Self::new(millis_to_utc(start_ms)?, millis_to_utc(end_ms)?)
    }

    /// Re-checks the ordering of the public fields, at millisecond precision.
    pub fn validate(&self) -> Result<(), VoucherError> {
        if self.start_ms() > self.end_ms() {
            return Err(VoucherError::InvertedWindow {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// Start as persisted.
    pub fn start_ms(&self) -> EpochMs {
        self.start.timestamp_millis()
    }

    /// End as persisted.
    pub fn end_ms(&self) -> EpochMs {
        self.end.timestamp_millis()
    }

    /// `(start_ms, end_ms)` pair fed to the overlap predicate.
    pub fn millis(&self) -> (EpochMs, EpochMs) {
        (self.start_ms(), self.end_ms())
    }

    /// True when the two closed windows share at least one instant.
    pub fn overlaps(&self, other: &Window) -> bool {
        overlaps(self.millis(), other.millis())
    }
}

/// A discount record identified by code plus validity window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voucher {
    /// Opaque code; not unique on its own.
    pub code: String,
    /// Non-negative discount amount.
    pub discount: f64,
    /// Validity window.
    pub window: Window,
}

impl Voucher {
    /// Validates and builds a voucher.
    pub fn new(
        code: impl Into<String>,
        discount: f64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self, VoucherError> {
        let voucher = Self {
            code: code.into(),
            discount,
            window: Window::new(start, end)?,
        };
        voucher.validate()?;
        Ok(voucher)
    }

    /// Re-checks the public fields; stores call this before any write.
    pub fn validate(&self) -> Result<(), VoucherError> {
        if !self.discount.is_finite() || self.discount < 0.0 {
            return Err(VoucherError::InvalidDiscount(self.discount));
        }
        self.window.validate()
    }
}

/// A voucher read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVoucher {
    /// Row id.
    pub id: VoucherId,
    /// Persisted voucher.
    pub voucher: Voucher,
}

fn millis_to_utc(ms: EpochMs) -> Result<DateTime<Utc>, VoucherError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or(VoucherError::TimestampOutOfRange(ms))
}
