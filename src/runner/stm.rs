//! Multi-threaded STM runner.
//!
//! Partitions the transfer list across worker threads; every transfer runs
//! in its own transaction, retried until it commits. Conflicts show up as
//! retries, never as lost updates.

use parking_lot::Mutex;
use std::thread;

use tl2_stm::Region;

use super::{apply_transfer, RunResult, Runner};
use crate::Workload;

/// Applies transfers from `num_threads` scoped worker threads.
#[derive(Debug, Clone, Copy)]
pub struct StmRunner {
    /// Number of worker threads.
    pub num_threads: usize,
}

impl StmRunner {
    /// Creates a runner with the given thread count.
    pub fn new(num_threads: usize) -> Self {
        Self { num_threads }
    }
}

impl Runner for StmRunner {
    fn name(&self) -> &'static str {
        "stm-parallel"
    }

    fn execute(&self, region: &Region, workload: &Workload) -> RunResult {
        if workload.transfers.is_empty() {
            return RunResult::default();
        }
        let threads = self.num_threads.max(1);
        let chunk_size = (workload.transfers.len() + threads - 1) / threads;

        let results = Mutex::new(RunResult::default());
        let results = &results;

        thread::scope(|scope| {
            for chunk in workload.transfers.chunks(chunk_size) {
                scope.spawn(move || {
                    let mut local = RunResult::default();
                    for transfer in chunk {
                        let (moved, retries) = apply_transfer(region, transfer);
                        if moved {
                            local.committed += 1;
                        } else {
                            local.failed += 1;
                        }
                        local.retries += retries;
                    }
                    results.lock().merge(local);
                });
            }
        });

        let merged = *results.lock();
        merged
    }
}
