//! Transactions and the TL2 commit protocol.
//!
//! A [`Transaction`] buffers its writes and validates its reads against the
//! read version (`rv`) it sampled from the global clock at begin. Commit
//! runs the classic TL2 sequence: lock the write-set stripes (one attempt
//! each), tick the clock, validate the read set, publish the writes, and
//! release every stripe at the new write version. Contention is resolved by
//! aborting, never by waiting, so no schedule can deadlock.
//!
//! Abort semantics are sharp: once `read`, `write`, `alloc`, or `free`
//! reports failure the transaction is dead — its buffers are discarded and
//! every further operation (including `commit`) fails without touching
//! shared memory.

use std::collections::BTreeSet;
use std::sync::atomic::{fence, Ordering};

use dashmap::mapref::one::Ref;

use crate::clock::{Version, GLOBAL_CLOCK};
use crate::region::{
    self, Address, Region, Segment, Word, FIRST_SEGMENT, WORD_SIZE,
};
use crate::txn::{ReadSet, WriteSet};

/// Outcome of a transactional allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocResult {
    /// The segment was allocated; its base address is returned.
    Allocated(Address),
    /// The host allocator is out of memory. The transaction may continue.
    OutOfMemory,
    /// The segment list was contended; the transaction is aborted.
    Aborted,
}

/// An in-flight transaction on a [`Region`].
///
/// Each transaction is driven from a single thread. Reads and writes go
/// through per-transaction buffers; shared memory is only mutated during a
/// successful commit.
pub struct Transaction<'r> {
    region: &'r Region,
    rv: Version,
    is_ro: bool,
    aborted: bool,
    read_set: ReadSet,
    write_set: WriteSet,
}

impl Region {
    /// Begins a transaction. `is_ro` selects the read-only fast path,
    /// which skips all bookkeeping and commits trivially.
    pub fn begin(&self, is_ro: bool) -> Transaction<'_> {
        Transaction {
            region: self,
            rv: GLOBAL_CLOCK.sample(),
            is_ro,
            aborted: false,
            read_set: ReadSet::new(),
            write_set: WriteSet::new(),
        }
    }
}

/// Checks the access contract for `addr`/`len` and resolves the containing
/// segment. `None` means contract violation or unknown segment.
fn resolve_span(
    region: &Region,
    addr: Address,
    len: usize,
) -> Option<(Ref<'_, usize, Segment>, usize)> {
    let align = region.align();
    if len == 0 || len % align != 0 || region::offset_of(addr) % align != 0 {
        return None;
    }
    let segment = region.segment(region::segment_of(addr))?;
    if region::offset_of(addr) + len > segment.len_bytes() {
        return None;
    }
    let first_word = region::offset_of(addr) / WORD_SIZE;
    Some((segment, first_word))
}

/// Loads one shared word, validated against `rv`.
///
/// Seqlock recipe: snapshot the stripe, load the word, fence, snapshot
/// again. The pair detects any writer that began or committed in between;
/// the version bound rejects words newer than the transaction's snapshot.
fn read_validated(
    region: &Region,
    word: &std::sync::atomic::AtomicUsize,
    addr: Address,
    rv: Version,
) -> Option<Word> {
    let stripe = region.stripe(addr);
    let before = stripe.snapshot();
    let value = word.load(Ordering::Relaxed);
    fence(Ordering::Acquire);
    let after = stripe.snapshot();

    if before.locked || after.locked || before.version != after.version || before.version > rv {
        return None;
    }
    Some(value)
}

impl<'r> Transaction<'r> {
    /// Marks the transaction dead and discards its buffers.
    fn abort(&mut self) -> bool {
        self.aborted = true;
        self.read_set.clear();
        self.write_set.clear();
        false
    }

    /// Reads `dst.len()` bytes from shared memory at `src` into private
    /// memory.
    ///
    /// Returns `false` if the transaction aborted (stale or contended
    /// read, or a contract violation); the transaction is then dead.
    pub fn read(&mut self, src: Address, dst: &mut [u8]) -> bool {
        if self.aborted {
            return false;
        }
        let region = self.region;
        let Some((segment, first_word)) = resolve_span(region, src, dst.len()) else {
            return self.abort();
        };

        let num_words = dst.len() / WORD_SIZE;
        for i in 0..num_words {
            let addr = src + i * WORD_SIZE;
            let value = if self.is_ro {
                match read_validated(region, segment.word(first_word + i), addr, self.rv) {
                    Some(value) => value,
                    None => return self.abort(),
                }
            } else if let Some(buffered) = self.write_set.lookup(addr) {
                // Satisfied from our own write buffer; commit will lock
                // this stripe, so the address stays out of the read set.
                buffered
            } else {
                match read_validated(region, segment.word(first_word + i), addr, self.rv) {
                    Some(value) => {
                        self.read_set.insert(addr);
                        value
                    }
                    None => return self.abort(),
                }
            };
            dst[i * WORD_SIZE..(i + 1) * WORD_SIZE].copy_from_slice(&value.to_ne_bytes());
        }
        true
    }

    /// Buffers a write of `src` into shared memory at `dst`. Shared memory
    /// is untouched until commit.
    pub fn write(&mut self, src: &[u8], dst: Address) -> bool {
        if self.aborted {
            return false;
        }
        if self.is_ro {
            return self.abort();
        }
        let region = self.region;
        if resolve_span(region, dst, src.len()).is_none() {
            return self.abort();
        }

        let num_words = src.len() / WORD_SIZE;
        for i in 0..num_words {
            let mut bytes = [0u8; WORD_SIZE];
            bytes.copy_from_slice(&src[i * WORD_SIZE..(i + 1) * WORD_SIZE]);
            self.write_set.record(dst + i * WORD_SIZE, Word::from_ne_bytes(bytes));
        }
        true
    }

    /// Reads a single shared word. `None` means the transaction aborted.
    pub fn read_word(&mut self, addr: Address) -> Option<Word> {
        let mut buf = [0u8; WORD_SIZE];
        if self.read(addr, &mut buf) {
            Some(Word::from_ne_bytes(buf))
        } else {
            None
        }
    }

    /// Buffers a single-word write.
    pub fn write_word(&mut self, addr: Address, value: Word) -> bool {
        self.write(&value.to_ne_bytes(), addr)
    }

    /// Allocates a zeroed segment of `size` bytes inside the transaction.
    ///
    /// The new segment is addressable immediately, by this transaction and
    /// by others; its contents are governed by the stripe locks like any
    /// other shared memory.
    pub fn alloc(&mut self, size: usize) -> AllocResult {
        if self.aborted {
            return AllocResult::Aborted;
        }
        let region = self.region;
        if size == 0 || size % region.align() != 0 {
            self.abort();
            return AllocResult::Aborted;
        }

        let segment = match Segment::zeroed(size / WORD_SIZE) {
            Ok(segment) => segment,
            Err(_) => return AllocResult::OutOfMemory,
        };

        if !region.list_lock.try_lock() {
            self.abort();
            return AllocResult::Aborted;
        }
        let addr = region.install_segment(segment);
        region.list_lock.unlock_restore();

        AllocResult::Allocated(addr)
    }

    /// Logically frees a segment previously returned by [`alloc`].
    ///
    /// The first segment cannot be freed. The segment's memory is
    /// reclaimed when the region is dropped, never earlier, so concurrent
    /// readers holding its addresses stay valid.
    ///
    /// [`alloc`]: Transaction::alloc
    pub fn free(&mut self, addr: Address) -> bool {
        if self.aborted {
            return false;
        }
        if region::segment_of(addr) == FIRST_SEGMENT || region::offset_of(addr) != 0 {
            return self.abort();
        }
        let region = self.region;
        if !region.list_lock.try_lock() {
            return self.abort();
        }
        let retired = region.retire_segment(addr);
        region.list_lock.unlock_restore();

        if retired {
            true
        } else {
            self.abort()
        }
    }

    /// Attempts to commit. Returns `true` iff every buffered write became
    /// visible atomically; on `false` the transaction had no effect.
    pub fn commit(self) -> bool {
        if self.aborted {
            return false;
        }
        if self.is_ro || self.write_set.is_empty() {
            // Reads were validated against rv as they happened; with
            // nothing to publish the transaction serializes at rv.
            return true;
        }
        let region = self.region;

        // Lock the write set: sorted stripe order, deduplicated, one
        // try_lock attempt per stripe.
        let stripes: BTreeSet<usize> =
            self.write_set.addresses().map(region::stripe_index).collect();
        let mut acquired: Vec<usize> = Vec::with_capacity(stripes.len());
        for &index in &stripes {
            if region.stripe_at(index).try_lock() {
                acquired.push(index);
            } else {
                for &held in &acquired {
                    region.stripe_at(held).unlock_restore();
                }
                return false;
            }
        }

        let wv = GLOBAL_CLOCK.tick() + 1;

        // Validate the read set, unless no other transaction committed
        // since we sampled rv.
        if self.rv + 1 != wv {
            for addr in self.read_set.iter() {
                let index = region::stripe_index(addr);
                let snap = region.stripe_at(index).snapshot();
                let locked_by_us = stripes.contains(&index);
                if snap.version > self.rv || (snap.locked && !locked_by_us) {
                    for &held in &stripes {
                        region.stripe_at(held).unlock_restore();
                    }
                    return false;
                }
            }
        }

        // Publish every buffered write, then release the stripes at wv.
        // All stores precede all releases, so a stripe covering several
        // written words is released exactly once, after its last store.
        for (addr, value) in self.write_set.iter() {
            if let Some(segment) = region.segment(region::segment_of(addr)) {
                segment
                    .word(region::offset_of(addr) / WORD_SIZE)
                    .store(value, Ordering::Relaxed);
            }
        }
        for &index in &stripes {
            region.stripe_at(index).unlock_release(wv);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn word_region(num_words: usize) -> Region {
        Region::new(num_words * WORD_SIZE, WORD_SIZE).expect("valid region parameters")
    }

    fn commit_word(region: &Region, addr: Address, value: Word) {
        let mut tx = region.begin(false);
        assert!(tx.write_word(addr, value));
        assert!(tx.commit());
    }

    fn read_committed(region: &Region, addr: Address) -> Word {
        loop {
            let mut tx = region.begin(true);
            if let Some(value) = tx.read_word(addr) {
                assert!(tx.commit());
                return value;
            }
        }
    }

    #[test]
    fn test_fresh_region_reads_zero() {
        let region = word_region(4);
        let mut tx = region.begin(true);
        for i in 0..4 {
            assert_eq!(tx.read_word(region.start() + i * WORD_SIZE), Some(0));
        }
        assert!(tx.commit());
    }

    #[test]
    fn test_committed_write_is_visible() {
        let region = word_region(4);
        commit_word(&region, region.start(), 0xAA);
        assert_eq!(read_committed(&region, region.start()), 0xAA);
    }

    #[test]
    fn test_uncommitted_write_is_invisible() {
        let region = word_region(4);
        let mut writer = region.begin(false);
        assert!(writer.write_word(region.start(), 7));

        assert_eq!(read_committed(&region, region.start()), 0);
        drop(writer);
        assert_eq!(read_committed(&region, region.start()), 0);
    }

    #[test]
    fn test_read_own_write() {
        let region = word_region(4);
        let mut tx = region.begin(false);
        assert!(tx.write_word(region.start(), 0x11));
        assert_eq!(tx.read_word(region.start()), Some(0x11));
        assert!(tx.commit());
    }

    #[test]
    fn test_last_write_wins() {
        let region = word_region(4);
        let mut tx = region.begin(false);
        assert!(tx.write_word(region.start(), 1));
        assert!(tx.write_word(region.start(), 2));
        assert!(tx.write_word(region.start(), 3));
        assert!(tx.commit());

        assert_eq!(read_committed(&region, region.start()), 3);
    }

    #[test]
    fn test_multi_word_read_write() {
        let region = word_region(8);
        let mut src = Vec::new();
        for value in [10usize, 20, 30, 40] {
            src.extend_from_slice(&value.to_ne_bytes());
        }

        let mut tx = region.begin(false);
        assert!(tx.write(&src, region.start()));
        assert!(tx.commit());

        let mut dst = vec![0u8; 4 * WORD_SIZE];
        let mut tx = region.begin(true);
        assert!(tx.read(region.start(), &mut dst));
        assert!(tx.commit());
        assert_eq!(dst, src);
    }

    #[test]
    fn test_stale_read_fails_inside_read() {
        let region = word_region(4);
        let mut reader = region.begin(true);

        // A commit after the reader began pushes the stripe version past
        // the reader's rv.
        commit_word(&region, region.start(), 5);

        assert_eq!(reader.read_word(region.start()), None);
        assert!(!reader.commit());
    }

    #[test]
    fn test_read_invalidation_aborts_commit() {
        let region = word_region(4);
        let a = region.start();
        let b = region.start() + WORD_SIZE;

        let mut t1 = region.begin(false);
        assert_eq!(t1.read_word(a), Some(0));

        // t2 commits a write to a after t1 read it.
        commit_word(&region, a, 9);

        assert!(t1.write_word(b, 1));
        assert!(!t1.commit());
        assert_eq!(read_committed(&region, b), 0);
    }

    #[test]
    fn test_write_write_conflict_serialized_both_commit() {
        let region = word_region(4);
        commit_word(&region, region.start(), 1);
        commit_word(&region, region.start(), 2);
        assert_eq!(read_committed(&region, region.start()), 2);
    }

    #[test]
    fn test_commit_installs_write_version_on_all_stripes() {
        let region = word_region(4);
        let a = region.start();
        let b = region.start() + WORD_SIZE;
        assert_ne!(region::stripe_index(a), region::stripe_index(b));

        let before = GLOBAL_CLOCK.sample();
        let mut tx = region.begin(false);
        assert!(tx.write_word(a, 1));
        assert!(tx.write_word(b, 2));
        assert!(tx.commit());

        let va = region.stripe(a).version();
        let vb = region.stripe(b).version();
        assert_eq!(va, vb);
        assert!(va > before);
    }

    #[test]
    fn test_commit_coalesces_colliding_stripes() {
        // Find two first-segment words that share a stripe; with more
        // words than stripes a collision is guaranteed.
        let num_words = crate::region::STRIPE_COUNT + 2;
        let region = word_region(num_words);

        let mut seen: HashMap<usize, Address> = HashMap::new();
        let mut pair = None;
        for i in 0..num_words {
            let addr = region.start() + i * WORD_SIZE;
            if let Some(&other) = seen.get(&region::stripe_index(addr)) {
                pair = Some((other, addr));
                break;
            }
            seen.insert(region::stripe_index(addr), addr);
        }
        let (a, b) = pair.expect("stripe collision must exist");

        let mut tx = region.begin(false);
        assert!(tx.write_word(a, 0xA));
        assert!(tx.write_word(b, 0xB));
        assert!(tx.commit());

        assert_eq!(read_committed(&region, a), 0xA);
        assert_eq!(read_committed(&region, b), 0xB);
    }

    #[test]
    fn test_ro_transaction_rejects_writes() {
        let region = word_region(4);
        let mut tx = region.begin(true);
        assert!(!tx.write_word(region.start(), 1));
        assert!(!tx.commit());
    }

    #[test]
    fn test_contract_violations_abort() {
        let region = word_region(4);

        // Misaligned length.
        let mut tx = region.begin(false);
        let mut dst = vec![0u8; WORD_SIZE + 1];
        assert!(!tx.read(region.start(), &mut dst));
        assert!(!tx.commit());

        // Out-of-bounds span.
        let mut tx = region.begin(false);
        let mut dst = vec![0u8; 8 * WORD_SIZE];
        assert!(!tx.read(region.start(), &mut dst));

        // Unknown segment.
        let mut tx = region.begin(false);
        assert!(!tx.write_word(region::segment_base(77), 1));
    }

    #[test]
    fn test_aborted_transaction_is_terminal() {
        let region = word_region(4);
        let mut tx = region.begin(false);
        let mut dst = vec![0u8; WORD_SIZE + 1];
        assert!(!tx.read(region.start(), &mut dst));

        assert_eq!(tx.read_word(region.start()), None);
        assert!(!tx.write_word(region.start(), 1));
        assert_eq!(tx.alloc(region.align()), AllocResult::Aborted);
        assert!(!tx.free(region.start()));
        assert!(!tx.commit());
    }

    #[test]
    fn test_alloc_visibility() {
        let region = word_region(4);

        let mut tx = region.begin(false);
        let addr = match tx.alloc(2 * WORD_SIZE) {
            AllocResult::Allocated(addr) => addr,
            other => panic!("allocation failed: {other:?}"),
        };
        // Fresh segments read as zero inside the allocating transaction.
        assert_eq!(tx.read_word(addr), Some(0));
        assert!(tx.write_word(addr, 0x66));
        assert!(tx.commit());

        assert_eq!(read_committed(&region, addr), 0x66);
    }

    #[test]
    fn test_free_contract() {
        let region = word_region(4);

        // The first segment cannot be freed.
        let mut tx = region.begin(false);
        assert!(!tx.free(region.start()));
        assert!(!tx.commit());

        let mut tx = region.begin(false);
        let addr = match tx.alloc(2 * WORD_SIZE) {
            AllocResult::Allocated(addr) => addr,
            other => panic!("allocation failed: {other:?}"),
        };
        assert!(tx.free(addr));
        assert!(tx.commit());

        // Double free and non-base addresses are rejected.
        let mut tx = region.begin(false);
        assert!(!tx.free(addr));
        let mut tx = region.begin(false);
        assert!(!tx.free(region.start() + WORD_SIZE));
    }

    #[test]
    fn test_misaligned_alloc_aborts() {
        let region = word_region(4);
        let mut tx = region.begin(false);
        assert_eq!(tx.alloc(WORD_SIZE + 1), AllocResult::Aborted);
        assert!(!tx.commit());
    }

    #[test]
    fn test_concurrent_increments_are_atomic() {
        let region = Arc::new(word_region(1));
        let num_threads = 4;
        let increments = 500;
        let barrier = Arc::new(Barrier::new(num_threads));

        let handles: Vec<_> = (0..num_threads)
            .map(|_| {
                let region = region.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..increments {
                        loop {
                            let mut tx = region.begin(false);
                            let Some(value) = tx.read_word(region.start()) else {
                                continue;
                            };
                            if !tx.write_word(region.start(), value + 1) {
                                continue;
                            }
                            if tx.commit() {
                                break;
                            }
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("increment thread panicked");
        }

        assert_eq!(
            read_committed(&region, region.start()),
            (num_threads * increments) as Word
        );
    }

    #[test]
    fn test_readers_never_observe_torn_transfers() {
        let region = Arc::new(word_region(2));
        let a = region.start();
        let b = region.start() + WORD_SIZE;
        let total: Word = 1_000;
        commit_word(&region, a, total);

        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let region = region.clone();
            let done = done.clone();
            thread::spawn(move || {
                for _ in 0..2_000 {
                    loop {
                        let mut tx = region.begin(false);
                        let Some(from) = tx.read_word(a) else { continue };
                        let Some(to) = tx.read_word(b) else { continue };
                        if from == 0 {
                            break;
                        }
                        if !tx.write_word(a, from - 1) || !tx.write_word(b, to + 1) {
                            continue;
                        }
                        if tx.commit() {
                            break;
                        }
                    }
                }
                done.store(true, Ordering::Release);
            })
        };

        let reader = {
            let region = region.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut audits = 0;
                while !done.load(Ordering::Acquire) || audits == 0 {
                    let mut tx = region.begin(true);
                    let Some(va) = tx.read_word(a) else { continue };
                    let Some(vb) = tx.read_word(b) else { continue };
                    assert!(tx.commit());
                    assert_eq!(va + vb, total, "torn read: {va} + {vb}");
                    audits += 1;
                }
            })
        };

        writer.join().expect("writer thread panicked");
        reader.join().expect("reader thread panicked");
        assert_eq!(read_committed(&region, a) + read_committed(&region, b), total);
    }
}
