use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use tempfile::TempDir;

use voucherdb::{
    persist::{
        StoreError, VoucherRepository,
        sqlite::{LOCK_ANCHOR_ID, SqliteVoucherStore, StoreConfig},
    },
    types::{Registration, Strategy},
    voucher::{Voucher, Window},
};

fn day(month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, month, day, 0, 0, 0).unwrap()
}

fn voucher(code: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Voucher {
    Voucher::new(code, 10.0, start, end).expect("voucher")
}

#[test]
fn overlapping_window_is_a_silent_no_op_and_disjoint_window_is_accepted() {
    let mut store = SqliteVoucherStore::open_in_memory().expect("open");

    let jan = voucher("SUMMER10", day(1, 1), day(1, 31));
    assert!(store.register_isolated(&jan).expect("jan").is_inserted());

    let mid = voucher("SUMMER10", day(1, 15), day(2, 15));
    assert_eq!(store.register_isolated(&mid).expect("mid"), Registration::Conflict);
    assert_eq!(store.vouchers_for("SUMMER10").expect("rows").len(), 1);
    assert!(store.exists("SUMMER10", &mid.window).expect("exists"));

    let feb = voucher("SUMMER10", day(2, 1), day(2, 28));
    assert!(store.register_isolated(&feb).expect("feb").is_inserted());

    let rows = store.vouchers_for("SUMMER10").expect("rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].voucher, jan);
    assert_eq!(rows[1].voucher, feb);
    assert_eq!(store.lock_acquisitions().expect("anchor"), 3);
}

#[test]
fn exists_flips_once_a_voucher_commits() {
    let mut store = SqliteVoucherStore::open_in_memory().expect("open");
    let window = Window::new(day(3, 1), day(3, 10)).expect("window");

    assert!(!store.exists("X", &window).expect("before"));
    store
        .register_isolated(&voucher("X", day(3, 5), day(3, 20)))
        .expect("register");
    assert!(store.exists("X", &window).expect("after"));
    assert!(!store.exists("Y", &window).expect("other code"));
}

#[test]
fn touching_boundary_counts_as_overlap_in_every_strategy() {
    for strategy in [Strategy::Naive, Strategy::Atomic, Strategy::Isolated] {
        let mut store = SqliteVoucherStore::open_in_memory().expect("open");
        let first = voucher("EDGE", day(1, 1), day(1, 31));
        let touching = voucher("EDGE", day(1, 31), day(2, 10));

        assert!(store.register_with(strategy, &first).expect("first").is_inserted());
        assert_eq!(
            store.register_with(strategy, &touching).expect("touching"),
            Registration::Conflict,
            "{strategy:?}"
        );
    }
}

#[test]
fn same_window_under_another_code_is_independent() {
    let store = SqliteVoucherStore::open_in_memory().expect("open");
    let a = voucher("A", day(4, 1), day(4, 30));
    let b = voucher("B", day(4, 1), day(4, 30));

    assert!(store.register_atomic(&a).expect("a").is_inserted());
    assert!(store.register_atomic(&b).expect("b").is_inserted());
    assert_eq!(store.register_atomic(&a).expect("a again"), Registration::Conflict);
    assert_eq!(store.load_all().expect("all").len(), 2);
}

#[test]
fn naive_register_skips_insert_when_check_sees_overlap() {
    let store = SqliteVoucherStore::open_in_memory().expect("open");
    let v = voucher("NAIVE", day(5, 1), day(5, 2));

    assert!(store.register(&v).expect("first").is_inserted());
    assert_eq!(store.register(&v).expect("second"), Registration::Conflict);
}

#[test]
fn invalid_voucher_never_reaches_the_database() {
    let mut store = SqliteVoucherStore::open_in_memory().expect("open");
    let mut v = voucher("BAD", day(6, 1), day(6, 2));
    v.discount = -3.0;

    assert!(matches!(store.register_isolated(&v), Err(StoreError::Invalid(_))));
    assert!(matches!(store.register_atomic(&v), Err(StoreError::Invalid(_))));
    assert!(matches!(store.register(&v), Err(StoreError::Invalid(_))));

    v.discount = 1.0;
    v.window.end = day(5, 1);
    assert!(matches!(store.register_isolated(&v), Err(StoreError::Invalid(_))));
    assert!(store.load_all().expect("all").is_empty());
}

#[test]
fn missing_lock_anchor_rolls_back_and_is_not_retryable() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("vouchers.db");

    let mut store = SqliteVoucherStore::open(&db_path).expect("open");
    let raw = Connection::open(&db_path).expect("raw");
    raw.execute("DELETE FROM lock_anchor", []).expect("delete anchor");

    let err = store
        .register_isolated(&voucher("ANCHOR", day(7, 1), day(7, 2)))
        .expect_err("no anchor");
    assert!(matches!(err, StoreError::MissingLockAnchor(id) if id == LOCK_ANCHOR_ID));
    assert!(!err.is_retryable());
    assert!(store.vouchers_for("ANCHOR").expect("rows").is_empty());

    // The atomic path does not need the anchor.
    assert!(store
        .register_atomic(&voucher("ANCHOR", day(7, 1), day(7, 2)))
        .expect("atomic")
        .is_inserted());
}

#[test]
fn held_write_lock_surfaces_as_retryable_busy() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("vouchers.db");
    let config = StoreConfig {
        busy_timeout_ms: 50,
        ..StoreConfig::default()
    };

    let mut store = SqliteVoucherStore::open_with(&db_path, &config).expect("open");
    let raw = Connection::open(&db_path).expect("raw");
    raw.execute_batch("BEGIN IMMEDIATE").expect("hold lock");

    let v = voucher("BUSY", day(8, 1), day(8, 31));
    let err = store.register_isolated(&v).expect_err("lock held");
    assert!(err.is_retryable(), "{err:?}");
    assert!(store.register_atomic(&v).expect_err("lock held").is_retryable());

    // Reads take no lock and still answer.
    assert!(!store.exists("BUSY", &v.window).expect("exists"));

    raw.execute_batch("ROLLBACK").expect("release");
    assert!(store.register_isolated(&v).expect("retry").is_inserted());
    assert_eq!(store.lock_acquisitions().expect("anchor"), 1);
}

#[test]
fn vouchers_survive_reopen() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("vouchers.db");
    let v = voucher("KEEP", day(9, 1), day(9, 30));

    {
        let mut store = SqliteVoucherStore::open(&db_path).expect("open");
        store.register_isolated(&v).expect("register");
    }

    let mut reopened = SqliteVoucherStore::open(&db_path).expect("reopen");
    assert_eq!(reopened.register_isolated(&v).expect("again"), Registration::Conflict);
    let all = VoucherRepository::load_all(&reopened).expect("all");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].voucher, v);
}

#[test]
fn failure_after_anchor_lock_rolls_back_the_whole_transaction() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("vouchers.db");

    let mut store = SqliteVoucherStore::open(&db_path).expect("open");
    let raw = Connection::open(&db_path).expect("raw");
    raw.execute_batch(
        "CREATE TRIGGER reject_vouchers BEFORE INSERT ON vouchers
         BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
    )
    .expect("create trigger");

    let v = voucher("ROLLBACK", day(10, 1), day(10, 31));
    let err = store.register_isolated(&v).expect_err("insert aborted");
    assert!(matches!(err, StoreError::Sqlite(_)), "{err:?}");
    assert!(!err.is_retryable());
    assert_eq!(store.lock_acquisitions().expect("anchor"), 0);
    assert!(store.vouchers_for("ROLLBACK").expect("rows").is_empty());

    raw.execute_batch("DROP TRIGGER reject_vouchers").expect("drop trigger");
    assert!(store.register_isolated(&v).expect("retry").is_inserted());
    assert_eq!(store.lock_acquisitions().expect("anchor"), 1);
}

#[test]
fn negative_anchor_counter_is_reported_as_corrupt() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("vouchers.db");

    let store = SqliteVoucherStore::open(&db_path).expect("open");
    let raw = Connection::open(&db_path).expect("raw");
    raw.execute("UPDATE lock_anchor SET acquisitions = -1 WHERE id = 1", [])
        .expect("corrupt counter");

    let err = store.lock_acquisitions().expect_err("negative counter");
    assert!(matches!(err, StoreError::Corrupt(_)), "{err:?}");
    assert!(!err.is_retryable());
}
