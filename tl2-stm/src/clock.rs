//! Global version clock.
//!
//! A single process-wide monotonic counter. Transactions sample it at begin
//! to fix their snapshot (`rv`) and tick it once at commit to mint their
//! write version (`wv`). Both operations are wait-free; the counter is
//! 64-bit and never wraps in any realistic workload.

use std::sync::atomic::{AtomicU64, Ordering};

/// A clock value. The low bit of a lock word is reserved for the lock bit,
/// so 63 bits of version are usable.
pub type Version = u64;

/// The process-wide clock shared by every region.
pub(crate) static GLOBAL_CLOCK: VersionClock = VersionClock::new();

/// Monotonically increasing version counter.
pub struct VersionClock {
    value: AtomicU64,
}

impl VersionClock {
    /// Creates a clock starting at zero.
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Returns the current clock value.
    pub fn sample(&self) -> Version {
        self.value.load(Ordering::Relaxed)
    }

    /// Atomically advances the clock by one and returns the previous value.
    ///
    /// A committing transaction's write version is `tick() + 1`.
    pub fn tick(&self) -> Version {
        self.value.fetch_add(1, Ordering::AcqRel)
    }
}

impl Default for VersionClock {
    fn default() -> Self {
        Self::new()
    }
}
