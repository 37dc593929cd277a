//! Overlap predicate and in-memory voucher book.

/// In-memory index of known vouchers.
pub mod book;
/// Closed-interval overlap predicate and its SQL twin.
pub mod overlap;
