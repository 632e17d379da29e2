//! Tracing setup for the command line tool
//!
//! Logs go to stderr so stdout stays a clean CSV stream.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// `filter` is an `EnvFilter` directive such as `info` or
/// `rust_ledger_engine::core=debug`. An unparseable directive falls back to
/// `warn`.
pub fn init_tracing(filter: &str) -> Result<(), String> {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| format!("Failed to initialise logging: {}", e))
}
