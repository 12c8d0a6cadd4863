//! Single-flight memoized boolean gate.
//!
//! Caches a flag that only ever transitions `false -> true` (e.g. "first
//! admin exists, registration is closed"). Until the flag latches, every call
//! re-consults storage; once latched, the cached value is served without a
//! lookup. The cache is process-local and is rebuilt from storage on restart.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// A memoized `false -> true` gate with single-flight loading.
///
/// Concurrent callers while the flag is unlatched serialize on the loader, so
/// storage is consulted by one caller at a time.
#[derive(Debug, Default)]
pub struct SingleFlightFlag {
    latched: AtomicBool,
    load: Mutex<()>,
}

impl SingleFlightFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value, or consult `load` if the flag has not latched.
    ///
    /// A loader returning `true` latches the flag permanently; `false` leaves
    /// it unlatched and the next call loads again. Loader errors propagate
    /// without latching.
    pub fn get_or_load<E>(&self, load: impl FnOnce() -> Result<bool, E>) -> Result<bool, E> {
        if self.latched.load(Ordering::Acquire) {
            return Ok(true);
        }

        let _guard = self.load.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Another caller may have latched while we waited on the lock.
        if self.latched.load(Ordering::Acquire) {
            return Ok(true);
        }

        let value = load()?;
        if value {
            self.latched.store(true, Ordering::Release);
        }
        Ok(value)
    }

    /// Latch the flag directly (e.g. immediately after the mutation that
    /// makes it true, to spare the next caller a storage round trip).
    pub fn latch(&self) {
        self.latched.store(true, Ordering::Release);
    }
}
