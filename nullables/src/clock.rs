//! Nullable clock: deterministic time for testing.

use std::sync::atomic::{AtomicU64, Ordering};

use relaynet_utils::Clock;

/// A deterministic clock for testing.
///
/// Time only advances when you tell it to.
#[derive(Debug)]
pub struct NullClock {
    current_ms: AtomicU64,
}

impl NullClock {
    pub fn new(initial_secs: u64) -> Self {
        Self {
            current_ms: AtomicU64::new(initial_secs * 1000),
        }
    }

    /// Advance time by a number of seconds.
    pub fn advance(&self, secs: u64) {
        self.current_ms.fetch_add(secs * 1000, Ordering::SeqCst);
    }

    /// Set the time to a specific value.
    pub fn set(&self, secs: u64) {
        self.current_ms.store(secs * 1000, Ordering::SeqCst);
    }
}

impl Default for NullClock {
    /// Mid-2024, so address timestamps and alert expirations look sane.
    fn default() -> Self {
        Self::new(1_720_000_000)
    }
}

impl Clock for NullClock {
    fn now_ms(&self) -> u64 {
        self.current_ms.load(Ordering::SeqCst)
    }
}
