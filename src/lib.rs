//! Voucher-code reservation over SQLite.
//!
//! Two persisted vouchers with the same code must never have overlapping
//! validity windows. Windows are closed, so touching boundaries overlap.
//! That rule cannot be a unique index, so it is enforced by how
//! registrations are written; see [`persist::sqlite`] for the three paths.
//!
//! # Examples
//!
//! Direct store usage:
//! ```
//! use chrono::{TimeZone, Utc};
//! use voucherdb::{
//!     persist::sqlite::SqliteVoucherStore,
//!     types::Registration,
//!     voucher::Voucher,
//! };
//!
//! let mut store = SqliteVoucherStore::open_in_memory().expect("open");
//! let jan = Voucher::new(
//!     "SUMMER10",
//!     10.0,
//!     Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
//!     Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
//! ).expect("voucher");
//! assert!(store.register_isolated(&jan).expect("register").is_inserted());
//! assert_eq!(store.register_isolated(&jan).expect("register"), Registration::Conflict);
//! ```
//!
//! Through the single-writer registrar:
//! ```no_run
//! use chrono::{TimeZone, Utc};
//! use voucherdb::{
//!     persist::sqlite::SqliteVoucherStore,
//!     runtime::handle::{spawn_registrar, RegistrarConfig},
//!     voucher::Voucher,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = SqliteVoucherStore::open("vouchers.db").expect("open sqlite");
//! let handle = spawn_registrar(Box::new(store), RegistrarConfig::default());
//! let voucher = Voucher::new(
//!     "SPRING5",
//!     5.0,
//!     Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
//!     Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap(),
//! ).expect("voucher");
//! let _outcome = handle.register(voucher).await.expect("register");
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Settings loading.
pub mod config;
/// Overlap predicate and in-memory book.
pub mod core;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// Single-writer registrar handle and events.
pub mod runtime;
/// Shared primitive types and enums.
pub mod types;
/// Voucher domain records.
pub mod voucher;
