//! Word-granular software transactional memory.
//!
//! This crate implements the TL2 (Transactional Locking II) algorithm:
//! threads access a word-addressable shared-memory region through
//! transactions that appear atomic, isolated, and serializable. A
//! transaction either commits entirely or aborts with no visible effect.
//!
//! # Core Components
//!
//! - **VersionClock**: process-wide monotonic counter anchoring snapshots
//! - **VersionedLock**: one atomic word per stripe packing `{version, lock bit}`
//! - **Region**: the shared memory, its stripe table, and its segment list
//! - **Transaction**: per-thread read/write buffering plus the commit protocol
//!
//! # Algorithm Overview
//!
//! 1. A transaction samples the clock at begin; the sample (`rv`) fixes its
//!    snapshot
//! 2. Reads are validated against `rv` with a pair of stripe snapshots
//!    around each load; writes go to a private buffer
//! 3. Commit locks every written stripe with a single CAS attempt each,
//!    aborting on any contention, so no transaction ever waits
//! 4. The clock is ticked once to mint the write version (`wv`), the read
//!    set is re-validated, and the buffered writes are published
//! 5. Every written stripe is released at `wv`, making the writes visible
//!    atomically
//!
//! # Example
//!
//! ```
//! use tl2_stm::{Region, WORD_SIZE};
//!
//! let region = Region::new(2 * WORD_SIZE, WORD_SIZE).unwrap();
//! let start = region.start();
//!
//! // Deposit 100 into the first word.
//! let mut tx = region.begin(false);
//! assert!(tx.write_word(start, 100));
//! assert!(tx.commit());
//!
//! // Read it back under a read-only transaction.
//! let mut tx = region.begin(true);
//! assert_eq!(tx.read_word(start), Some(100));
//! assert!(tx.commit());
//! ```

pub mod clock;
pub mod lock;
pub mod region;
pub mod tm;
mod txn;

pub use clock::{Version, VersionClock};
pub use lock::{LockSnapshot, VersionedLock};
pub use region::{Address, Region, RegionError, Word, WORD_SIZE};
pub use tm::{AllocResult, Transaction};
