//! Closed-interval overlap, shared by in-memory checks and SQL.

/// True iff `[a.0, a.1]` and `[b.0, b.1]` intersect.
///
/// Boundaries are inclusive: `[d1, d2]` and `[d2, d3]` overlap.
pub fn overlaps<T: Ord>(a: (T, T), b: (T, T)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

/// SQL form of [`overlaps`] against the `vouchers` table.
///
/// Binds `:code`, `:start_ms` and `:end_ms`. Expands to a string literal so it
/// can be spliced with `concat!` into every statement that needs it.
macro_rules! overlap_clause {
    () => {
        "code = :code AND start_ms <= :end_ms AND :start_ms <= end_ms"
    };
}

pub(crate) use overlap_clause;
