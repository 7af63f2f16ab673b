//! Workload execution strategies.
//!
//! This module provides the [`Runner`] trait and implementations for
//! applying a transfer workload to an STM region: a sequential baseline
//! and a multi-threaded runner with abort/retry loops.

mod sequential;
mod stm;

pub use sequential::SequentialRunner;
pub use stm::StmRunner;

use tl2_stm::Region;

use crate::{account_address, Transfer, Workload};

/// Result of applying a workload.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunResult {
    /// Transfers that moved money and committed.
    pub committed: usize,
    /// Transfers skipped for insufficient balance.
    pub failed: usize,
    /// Aborted transaction attempts that were retried.
    pub retries: usize,
}

impl RunResult {
    /// Total number of transfers processed.
    pub fn total(&self) -> usize {
        self.committed + self.failed
    }

    /// Folds another result into this one.
    pub fn merge(&mut self, other: RunResult) {
        self.committed += other.committed;
        self.failed += other.failed;
        self.retries += other.retries;
    }
}

/// Trait for different workload execution strategies.
pub trait Runner {
    /// Human-readable name for result tables.
    fn name(&self) -> &'static str;

    /// Applies every transfer in the workload to the region.
    ///
    /// On return the region's balance sum equals the workload's expected
    /// total; how much parallelism and how many retries that took is up to
    /// the implementation.
    fn execute(&self, region: &Region, workload: &Workload) -> RunResult;
}

/// Applies one transfer in its own transaction, retrying until a commit.
///
/// Returns whether the transfer moved money, and how many attempts were
/// aborted along the way. A transfer whose source balance is insufficient
/// commits as a no-op and counts as failed.
pub(crate) fn apply_transfer(region: &Region, transfer: &Transfer) -> (bool, usize) {
    let from_addr = account_address(region, transfer.from);
    let to_addr = account_address(region, transfer.to);
    let mut retries = 0;

    loop {
        let mut tx = region.begin(false);

        let Some(from_balance) = tx.read_word(from_addr) else {
            retries += 1;
            continue;
        };
        if from_balance < transfer.amount {
            if tx.commit() {
                return (false, retries);
            }
            retries += 1;
            continue;
        }
        let Some(to_balance) = tx.read_word(to_addr) else {
            retries += 1;
            continue;
        };

        if !tx.write_word(from_addr, from_balance - transfer.amount)
            || !tx.write_word(to_addr, to_balance + transfer.amount)
        {
            retries += 1;
            continue;
        }
        if tx.commit() {
            return (true, retries);
        }
        retries += 1;
    }
}
