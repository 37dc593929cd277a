use hashbrown::HashMap;

use crate::voucher::{Voucher, Window};

/// Windows already taken, grouped by code.
///
/// Vouchers are never deleted, so a hit here always implies a persisted
/// conflict. A miss says nothing about the store.
#[derive(Debug, Default)]
pub struct VoucherBook {
    by_code: HashMap<String, Vec<Window>>,
    len: usize,
}

impl VoucherBook {
    /// Empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a book from already-persisted vouchers.
    pub fn from_vouchers<'a>(vouchers: impl IntoIterator<Item = &'a Voucher>) -> Self {
        let mut book = Self::new();
        for voucher in vouchers {
            book.insert(voucher);
        }
        book
    }

    /// In-memory counterpart of the store's overlap count.
    pub fn exists(&self, code: &str, window: &Window) -> bool {
        self.by_code
            .get(code)
            .is_some_and(|windows| windows.iter().any(|w| w.overlaps(window)))
    }

    /// Records `voucher` unless it overlaps a known one. Returns whether it was added.
    pub fn try_register(&mut self, voucher: &Voucher) -> bool {
        if self.exists(&voucher.code, &voucher.window) {
            return false;
        }
        self.insert(voucher);
        true
    }

    /// Records `voucher` unconditionally, e.g. after the store accepted it.
    pub fn insert(&mut self, voucher: &Voucher) {
        self.by_code
            .entry(voucher.code.clone())
            .or_default()
            .push(voucher.window);
        self.len += 1;
    }

    /// Known windows for `code`, in insertion order.
    pub fn windows(&self, code: &str) -> &[Window] {
        self.by_code.get(code).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of recorded vouchers.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
