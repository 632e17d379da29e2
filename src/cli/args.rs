use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::core::PoolConfig;

/// Replay ledger requests from a CSV file and print the final balances
#[derive(Parser, Debug)]
#[command(name = "ledger-engine")]
#[command(about = "Replay ledger requests from a CSV file and print the final balances", long_about = None)]
pub struct CliArgs {
    /// Input CSV file path containing ledger requests
    #[arg(value_name = "INPUT", help = "Path to the input CSV file")]
    pub input_file: PathBuf,

    /// How requests are executed
    #[arg(
        long = "strategy",
        value_name = "STRATEGY",
        env = "LEDGER_STRATEGY",
        default_value = "sequential",
        help = "Execution strategy: 'sequential' settles each request in order, 'pool' settles batches through the worker pool"
    )]
    pub strategy: StrategyType,

    /// Number of pool workers (pool mode only)
    #[arg(
        long = "workers",
        value_name = "COUNT",
        env = "LEDGER_WORKERS",
        help = "Number of concurrent workers (default: CPU cores)"
    )]
    pub workers: Option<usize>,

    /// Requests per batch (pool mode only)
    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        env = "LEDGER_BATCH_SIZE",
        help = "Number of requests per batch (default: 1000)"
    )]
    pub batch_size: Option<usize>,

    /// Simulated latency per job (pool mode only)
    #[arg(
        long = "processing-delay-ms",
        value_name = "MS",
        env = "LEDGER_PROCESSING_DELAY_MS",
        default_value_t = 0,
        help = "Extra latency added to every job, in milliseconds"
    )]
    pub processing_delay_ms: u64,

    /// Per-batch deadline (pool mode only)
    #[arg(
        long = "timeout-ms",
        value_name = "MS",
        env = "LEDGER_TIMEOUT_MS",
        help = "Cancel a batch that takes longer than this, in milliseconds"
    )]
    pub timeout_ms: Option<u64>,

    /// Log filter, e.g. 'info' or 'rust_ledger_engine=debug'
    #[arg(
        long = "log-level",
        value_name = "FILTER",
        env = "LEDGER_LOG",
        default_value = "warn",
        help = "Log filter directive written to stderr"
    )]
    pub log_level: String,
}

/// Available execution strategies
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyType {
    Sequential,
    Pool,
}

impl CliArgs {
    /// Create a PoolConfig from CLI arguments
    ///
    /// Missing values fall back to defaults; zero values are replaced by
    /// defaults with a warning.
    pub fn to_pool_config(&self) -> PoolConfig {
        let default = PoolConfig::default();
        PoolConfig::new(
            self.workers.unwrap_or(default.workers),
            self.batch_size.unwrap_or(default.queue_size),
            Duration::from_millis(self.processing_delay_ms),
        )
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
