//! `ledgerkit-observability` — shared tracing/logging setup.
//!
//! The ledger crates only *emit* via `tracing`; wiring a subscriber is the
//! embedding process's job and happens exactly once, here.

/// Initialize process-wide tracing/logging.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;
