//! Sequential workload runner.
//!
//! The baseline: one thread, one transaction per transfer, in workload
//! order. Retries only happen if something else is mutating the region
//! concurrently, so a quiet run reports zero.

use tl2_stm::Region;

use super::{apply_transfer, RunResult, Runner};
use crate::Workload;

/// Applies transfers one at a time on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialRunner;

impl Runner for SequentialRunner {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn execute(&self, region: &Region, workload: &Workload) -> RunResult {
        let mut result = RunResult::default();

        for transfer in &workload.transfers {
            let (moved, retries) = apply_transfer(region, transfer);
            if moved {
                result.committed += 1;
            } else {
                result.failed += 1;
            }
            result.retries += retries;
        }

        result
    }
}
