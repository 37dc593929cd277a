//! Registrar event stream payloads.

use crate::types::VoucherId;
use crate::voucher::Window;

/// Events emitted from the registrar loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoucherEvent {
    /// A voucher row was written.
    Registered {
        /// New row id.
        id: VoucherId,
        /// Voucher code.
        code: String,
    },
    /// Registration was a no-op because an overlapping voucher exists.
    Conflict {
        /// Voucher code.
        code: String,
        /// Requested window.
        window: Window,
    },
}
