//! Ledger Engine CLI
//!
//! Replays ledger requests from a CSV file and prints the final balances.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- requests.csv > balances.csv
//! cargo run -- --strategy pool --workers 8 --batch-size 500 requests.csv > balances.csv
//! LEDGER_LOG=info cargo run -- --strategy pool --timeout-ms 2000 requests.csv
//! ```
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (missing arguments, file not found, file not readable, etc.)

use rust_ledger_engine::cli::{self, StrategyType};
use rust_ledger_engine::{logging, strategy};
use std::process;

fn main() {
    let args = cli::parse_args();

    if let Err(e) = logging::init_tracing(&args.log_level) {
        eprintln!("Warning: {}", e);
    }

    let strategy = {
        let config = if matches!(args.strategy, StrategyType::Pool) {
            Some(args.to_pool_config())
        } else {
            None
        };
        strategy::create_strategy(args.strategy, config, args.timeout())
    };

    let mut output = std::io::stdout();
    if let Err(e) = strategy.process(&args.input_file, &mut output) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
