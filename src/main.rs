//! Benchmark runner for the TL2 STM engine.

use std::time::Instant;

use eyre::{ensure, Result};
use stm_test::{total_balance, Runner, SequentialRunner, StmRunner, Workload, WorkloadConfig};

/// Configuration for a single benchmark run.
struct BenchmarkConfig {
    name: &'static str,
    conflict_factor: f64,
}

/// Results from a single benchmark run.
#[derive(Debug)]
struct BenchmarkResult {
    config_name: &'static str,
    runner_name: &'static str,
    threads: usize,
    committed: usize,
    failed: usize,
    retries: usize,
    duration_ms: f64,
    throughput_tps: f64,
}

impl BenchmarkResult {
    fn print_header() {
        println!(
            "{:<16} | {:<14} | {:<7} | {:<9} | {:<7} | {:<8} | {:<10} | {:<12}",
            "Config", "Runner", "Threads", "Committed", "Failed", "Retries", "Time (ms)", "TPS"
        );
        println!("{}", "-".repeat(100));
    }

    fn print(&self) {
        println!(
            "{:<16} | {:<14} | {:<7} | {:<9} | {:<7} | {:<8} | {:<10.2} | {:<12.0}",
            self.config_name,
            self.runner_name,
            self.threads,
            self.committed,
            self.failed,
            self.retries,
            self.duration_ms,
            self.throughput_tps,
        );
    }
}

fn run_one(
    config: &BenchmarkConfig,
    workload: &Workload,
    runner: &dyn Runner,
    threads: usize,
) -> Result<BenchmarkResult> {
    let region = workload.create_region();

    let start = Instant::now();
    let result = runner.execute(&region, workload);
    let elapsed = start.elapsed();

    // Every run must conserve the balance sum, whatever the schedule was.
    let total = total_balance(&region, workload.config.num_accounts);
    ensure!(
        total == workload.expected_total(),
        "balance sum diverged: got {total}, expected {}",
        workload.expected_total()
    );

    Ok(BenchmarkResult {
        config_name: config.name,
        runner_name: runner.name(),
        threads,
        committed: result.committed,
        failed: result.failed,
        retries: result.retries,
        duration_ms: elapsed.as_secs_f64() * 1000.0,
        throughput_tps: result.total() as f64 / elapsed.as_secs_f64(),
    })
}

fn main() -> Result<()> {
    println!("TL2 STM Benchmark Suite");
    println!();

    let configs = vec![
        BenchmarkConfig {
            name: "No conflicts",
            conflict_factor: 0.0,
        },
        BenchmarkConfig {
            name: "25% conflicts",
            conflict_factor: 0.25,
        },
        BenchmarkConfig {
            name: "50% conflicts",
            conflict_factor: 0.5,
        },
        BenchmarkConfig {
            name: "75% conflicts",
            conflict_factor: 0.75,
        },
        BenchmarkConfig {
            name: "Full conflicts",
            conflict_factor: 1.0,
        },
    ];

    let num_accounts = 4_096;
    let num_transfers = 20_000;
    let thread_counts = [1, 2, 4, 8];

    println!("Benchmark Configuration:");
    println!("  • Accounts: {num_accounts}");
    println!("  • Transfers per run: {num_transfers}");
    println!("  • Thread counts: {thread_counts:?}");
    println!();

    let mut all_results = Vec::new();

    BenchmarkResult::print_header();
    for config in &configs {
        let workload = Workload::generate(WorkloadConfig {
            num_accounts,
            num_transfers,
            conflict_factor: config.conflict_factor,
            seed: 42,
        });

        let result = run_one(config, &workload, &SequentialRunner, 1)?;
        result.print();
        all_results.push(result);

        for &threads in &thread_counts {
            let runner = StmRunner::new(threads);
            let result = run_one(config, &workload, &runner, threads)?;
            result.print();
            all_results.push(result);
        }
    }
    println!();

    println!("Summary:");
    for config in &configs {
        let best = all_results
            .iter()
            .filter(|r| r.config_name == config.name)
            .max_by(|a, b| {
                a.throughput_tps
                    .partial_cmp(&b.throughput_tps)
                    .expect("throughput is finite")
            });
        if let Some(best) = best {
            println!(
                "  • {:<16} best: {} with {} thread(s) at {:.0} tx/s ({} retries)",
                config.name, best.runner_name, best.threads, best.throughput_tps, best.retries
            );
        }
    }

    Ok(())
}
