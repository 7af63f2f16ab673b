//! Benchmarking framework for the `tl2-stm` transactional memory engine.
//!
//! This crate drives the STM core with bank-transfer workloads: a region
//! whose first segment holds one balance word per account, and a stream of
//! transfers applied through transactions. The conserved quantity — the sum
//! of all balances — makes atomicity violations directly observable.
//!
//! # Architecture
//!
//! The framework is organized around three main concepts:
//!
//! - **Workload**: a pre-generated, seeded list of transfers with a tunable
//!   conflict factor
//! - **Runner**: a strategy for applying the transfers (sequential baseline,
//!   multi-threaded STM)
//! - **Region**: the shared memory the transfers run against
//!
//! # Quick Start
//!
//! ```
//! use stm_test::{Runner, SequentialRunner, Workload, WorkloadConfig};
//!
//! let config = WorkloadConfig {
//!     num_accounts: 100,
//!     num_transfers: 50,
//!     conflict_factor: 0.0,
//!     seed: 42,
//! };
//!
//! let workload = Workload::generate(config);
//! let region = workload.create_region();
//!
//! let runner = SequentialRunner;
//! let result = runner.execute(&region, &workload);
//!
//! assert_eq!(result.total(), 50);
//! ```

pub mod runner;

pub use runner::{RunResult, Runner, SequentialRunner, StmRunner};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tl2_stm::{Address, Region, Word, WORD_SIZE};

/// Balance every account starts with.
pub const INITIAL_BALANCE: Word = 1_000;

// ============================================================================
// Workload Configuration & Generation
// ============================================================================

/// Configuration for workload generation.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Total number of accounts in the region's first segment.
    pub num_accounts: usize,
    /// Number of transfers to generate.
    pub num_transfers: usize,
    /// Conflict factor: 0.0 = no conflicts, 1.0 = all transfers touch the
    /// same two accounts.
    pub conflict_factor: f64,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            num_accounts: 1000,
            num_transfers: 100,
            conflict_factor: 0.0,
            seed: 42,
        }
    }
}

/// One balance movement between two distinct accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub from: usize,
    pub to: usize,
    pub amount: Word,
}

/// A complete benchmark workload with pre-generated transfers.
#[derive(Debug, Clone)]
pub struct Workload {
    /// The transfers to apply, in order.
    pub transfers: Vec<Transfer>,
    /// The configuration used to generate this workload.
    pub config: WorkloadConfig,
}

impl Workload {
    /// Generates a new workload from the given configuration.
    pub fn generate(config: WorkloadConfig) -> Self {
        debug_assert!(config.num_accounts >= 2, "transfers need two distinct accounts");
        let mut rng = StdRng::seed_from_u64(config.seed);

        // Calculate the "hot" account range for conflict simulation.
        let hot_account_count = if config.conflict_factor > 0.0 {
            (2.0 + (1.0 - config.conflict_factor) * (config.num_accounts as f64 - 2.0))
                .max(2.0) as usize
        } else {
            config.num_accounts
        };

        let transfers: Vec<Transfer> = (0..config.num_transfers)
            .map(|_| {
                let use_hot = rng.gen::<f64>() < config.conflict_factor;
                let range = if use_hot {
                    hot_account_count
                } else {
                    config.num_accounts
                };

                let from = rng.gen_range(0..range);
                let mut to = rng.gen_range(0..range);
                while to == from {
                    to = rng.gen_range(0..range);
                }

                Transfer {
                    from,
                    to,
                    amount: rng.gen_range(1..=10),
                }
            })
            .collect();

        Self { transfers, config }
    }

    /// Creates a region with one balance word per account, every account
    /// funded with [`INITIAL_BALANCE`].
    pub fn create_region(&self) -> Region {
        let region = Region::new(self.config.num_accounts * WORD_SIZE, WORD_SIZE)
            .expect("workload region parameters are valid");

        // Fund the accounts through a setup transaction; nothing else is
        // running, so it cannot conflict.
        let mut tx = region.begin(false);
        for index in 0..self.config.num_accounts {
            let funded = tx.write_word(account_address(&region, index), INITIAL_BALANCE);
            debug_assert!(funded);
        }
        let committed = tx.commit();
        debug_assert!(committed, "funding transaction cannot conflict");

        region
    }

    /// The balance sum every committed snapshot of this workload's region
    /// must show.
    pub fn expected_total(&self) -> Word {
        self.config.num_accounts * INITIAL_BALANCE
    }
}

/// Address of the balance word for `index` in the region's first segment.
pub fn account_address(region: &Region, index: usize) -> Address {
    region.start() + index * WORD_SIZE
}

/// Sums every account balance under a read-only transaction, retrying
/// until an audit commits.
pub fn total_balance(region: &Region, num_accounts: usize) -> Word {
    let mut buf = vec![0u8; num_accounts * WORD_SIZE];
    loop {
        let mut tx = region.begin(true);
        if tx.read(region.start(), &mut buf) && tx.commit() {
            return buf
                .chunks_exact(WORD_SIZE)
                .map(|chunk| {
                    let mut bytes = [0u8; WORD_SIZE];
                    bytes.copy_from_slice(chunk);
                    Word::from_ne_bytes(bytes)
                })
                .sum();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
