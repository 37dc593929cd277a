//! Single-writer async registrar and event stream APIs.

/// Event stream types emitted by the registrar.
pub mod events;
/// Handle and command loop implementation.
pub mod handle;
