//! Batch submission with count-based completion
//!
//! `BatchProcessor` sizes a [`WorkerPool`] to a batch, feeds it, and
//! aggregates results by counting them. Results are never matched to
//! submissions by position.
//!
//! # Flow
//!
//! ```text
//! process_batch(K jobs, deadline)
//!     ├── pool.start()
//!     ├── spawn aggregator ── counts results until K arrive or channel closes
//!     ├── add_job × K, close_jobs
//!     ├── deadline elapsed? ── cancel token ── remaining jobs come back failed
//!     └── pool.wait(), join aggregator ──▶ BatchReport
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::pool::{JobHandler, PoolConfig, ProcessingResult, WorkerPool};
use crate::core::stats::StatsTracker;
use crate::types::Transaction;

/// Outcome of one batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    /// One entry per job, in arrival order
    pub results: Vec<ProcessingResult>,
    pub completed: usize,
    pub failed: usize,
    /// Jobs that never produced a result
    pub missing: usize,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.missing == 0
    }
}

/// Runs batches of pending transactions through a fresh worker pool each
#[derive(Debug)]
pub struct BatchProcessor<H> {
    handler: Arc<H>,
    config: PoolConfig,
    stats: Arc<StatsTracker>,
    cancel: CancellationToken,
}

impl<H> Clone for BatchProcessor<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
            cancel: self.cancel.clone(),
        }
    }
}

impl<H: JobHandler + 'static> BatchProcessor<H> {
    /// Create a new BatchProcessor
    ///
    /// `config.queue_size` is ignored: every pool is sized to its batch.
    pub fn new(handler: Arc<H>, config: PoolConfig, stats: Arc<StatsTracker>) -> Self {
        Self {
            handler,
            config,
            stats,
            cancel: CancellationToken::new(),
        }
    }

    /// Tie every batch to `cancel` in addition to its own deadline
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn stats(&self) -> &Arc<StatsTracker> {
        &self.stats
    }

    /// Process a batch and wait for exactly one result per job
    ///
    /// When `deadline` elapses first, the batch is cancelled: jobs still in
    /// flight or queued come back as `failed` results.
    pub async fn process_batch(
        &self,
        batch: Vec<Transaction>,
        deadline: Option<Duration>,
    ) -> BatchReport {
        let started = Instant::now();
        let expected = batch.len();
        if expected == 0 {
            return BatchReport {
                results: Vec::new(),
                completed: 0,
                failed: 0,
                missing: 0,
                elapsed: started.elapsed(),
            };
        }

        let cancel = self.cancel.child_token();
        let config = PoolConfig {
            queue_size: expected,
            ..self.config.clone()
        };
        let pool = WorkerPool::new(
            config,
            Arc::clone(&self.handler),
            Arc::clone(&self.stats),
            cancel.clone(),
        );

        let Some(mut results) = pool.results() else {
            warn!("Worker pool results already taken");
            return BatchReport {
                results: Vec::new(),
                completed: 0,
                failed: 0,
                missing: expected,
                elapsed: started.elapsed(),
            };
        };
        let aggregator = tokio::spawn(async move { aggregate(&mut results, expected).await });

        let mut rejected = Vec::new();
        if let Err(e) = pool.start() {
            warn!(error = %e, "Failed to start worker pool");
        }
        for job in batch {
            if let Err(e) = pool.add_job(job.clone()).await {
                self.stats.record_failed();
                rejected.push(ProcessingResult::failed(job, e));
            }
        }
        if let Err(e) = pool.close_jobs() {
            warn!(error = %e, "Job queue already closed");
        }

        let timer = deadline.map(|deadline| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                warn!(?deadline, "Batch deadline elapsed, cancelling");
                cancel.cancel();
            })
        });
        pool.wait().await;
        if let Some(timer) = timer {
            timer.abort();
        }

        let mut collected = match aggregator.await {
            Ok(collected) => collected,
            Err(e) => {
                warn!(error = %e, "Result aggregator panicked");
                Vec::new()
            }
        };
        collected.extend(rejected);

        let completed = collected.iter().filter(|r| r.is_completed()).count();
        let failed = collected.len() - completed;
        let report = BatchReport {
            missing: expected.saturating_sub(collected.len()),
            results: collected,
            completed,
            failed,
            elapsed: started.elapsed(),
        };

        info!(
            expected,
            completed = report.completed,
            failed = report.failed,
            missing = report.missing,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Batch processed"
        );

        report
    }
}

/// Count results until `expected` arrive or every sender is gone
async fn aggregate(
    results: &mut mpsc::Receiver<ProcessingResult>,
    expected: usize,
) -> Vec<ProcessingResult> {
    let mut collected = Vec::with_capacity(expected);
    while collected.len() < expected {
        match results.recv().await {
            Some(result) => collected.push(result),
            None => break,
        }
    }
    collected
}
