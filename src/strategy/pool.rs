//! Worker pool processing strategy
//!
//! # Architecture
//!
//! ```text
//! PoolStrategy
//!     ├── PoolConfig (workers, batch size, simulated delay)
//!     ├── RequestReader (batch CSV reading)
//!     ├── TransactionService (submit, rollback)
//!     └── BatchProcessor (one WorkerPool per batch, count-based aggregation)
//!         └── TransactionService as JobHandler (settlement)
//! ```
//!
//! # Per batch
//!
//! 1. Every money movement is submitted as a `pending` transaction.
//! 2. Rollback rows run next, so they can reverse transfers that are still
//!    pending in this batch.
//! 3. The remaining pending transactions are settled concurrently by the
//!    pool. Rolled back transfers come back as failed results.
//!
//! Within a batch, settlement order is not defined. Inputs whose outcome
//! depends on row order (a withdrawal funded by a deposit in the same batch)
//! may settle differently from the sequential strategy.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::{BatchProcessor, MemoryStore, PoolConfig, StatsTracker, TransactionService};
use crate::io::{write_balances_csv, LedgerRequest, RequestReader};
use crate::strategy::{apply_rollback, ProcessingStrategy, References};

/// Worker pool processing strategy
///
/// Batches are processed one after the other; transactions within a batch
/// are settled in parallel by `config.workers` workers.
#[derive(Debug, Clone)]
pub struct PoolStrategy {
    config: PoolConfig,
    timeout: Option<Duration>,
}

impl PoolStrategy {
    /// `config.queue_size` doubles as the batch size
    pub fn new(config: PoolConfig, timeout: Option<Duration>) -> Self {
        Self { config, timeout }
    }
}

impl ProcessingStrategy for PoolStrategy {
    fn process(&self, input_path: &Path, output: &mut dyn Write) -> Result<(), String> {
        let mut reader = RequestReader::new(input_path)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.workers)
            .enable_all()
            .build()
            .map_err(|e| format!("Failed to create tokio runtime: {}", e))?;

        let store = Arc::new(MemoryStore::new());
        let stats = Arc::new(StatsTracker::new());

        runtime.block_on(async {
            let cancel = CancellationToken::new();
            let service = TransactionService::with_cancellation(Arc::clone(&store), cancel.clone());
            let processor = BatchProcessor::new(
                Arc::new(service.clone()),
                self.config.clone(),
                Arc::clone(&stats),
            )
            .with_cancellation(cancel);

            let mut references = References::default();
            let mut batch_num = 0usize;

            loop {
                let batch = reader.read_batch(self.config.queue_size);
                if batch.is_empty() {
                    break;
                }
                batch_num += 1;

                let mut jobs = Vec::with_capacity(batch.len());
                let mut rollbacks = Vec::new();
                for result in batch {
                    match result {
                        Ok(LedgerRequest::Move { reference, draft }) => {
                            match service.submit(draft).await {
                                Ok(pending) => {
                                    references.record(reference, &pending);
                                    jobs.push(pending);
                                }
                                Err(e) => warn!(?reference, error = %e, "Request rejected"),
                            }
                        }
                        Ok(LedgerRequest::Rollback { target }) => rollbacks.push(target),
                        Err(e) => warn!(error = %e, "Skipping malformed request"),
                    }
                }

                for target in rollbacks {
                    apply_rollback(&service, &references, target).await;
                }

                let report = processor.process_batch(jobs, self.timeout).await;
                for failed in report.results.iter().filter(|r| !r.is_completed()) {
                    if let Err(e) = &failed.result {
                        warn!(tx_id = failed.transaction.id, error = %e, "Transaction failed");
                    }
                }
                if !report.is_complete() {
                    warn!(batch = batch_num, missing = report.missing, "Batch lost results");
                }
            }

            info!(batches = batch_num, stats = ?stats.snapshot(), "Input processed");
        });

        write_balances_csv(&store.balances(), output)
    }
}
