//! Fixed-size worker pool draining a bounded job queue
//!
//! # Architecture
//!
//! ```text
//!  add_job ──▶ [ job queue (bounded) ] ──▶ worker 0 ─┐
//!                                      ├──▶ worker 1 ─┼──▶ [ results (bounded) ] ──▶ results()
//!                                      └──▶ worker N ─┘
//! ```
//!
//! Every worker shares one receiver. Results arrive in whatever order workers
//! finish, so consumers must aggregate by count, not by position.
//!
//! # Cancellation
//!
//! The pool observes a `CancellationToken`. Once it fires, workers stop
//! taking jobs, in-flight handlers abort at their next checkpoint, and
//! [`WorkerPool::wait`] reports everything still queued as `failed`. No job
//! that made it into the queue is silently dropped.
//!
//! # Simulated latency
//!
//! `PoolConfig::processing_delay` is slept by the worker before every job is
//! handed to the handler. A job cancelled during that sleep never reaches the
//! handler.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::service::TransactionService;
use crate::core::stats::StatsTracker;
use crate::core::traits::LedgerStore;
use crate::types::{LedgerError, Transaction};

/// Worker pool sizing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// Capacity of the job and result queues
    pub queue_size: usize,
    /// Latency added before every job
    pub processing_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            queue_size: 1000,
            processing_delay: Duration::ZERO,
        }
    }
}

impl PoolConfig {
    /// Create a new PoolConfig, falling back to defaults for zero sizes
    pub fn new(workers: usize, queue_size: usize, processing_delay: Duration) -> Self {
        let default = Self::default();

        let workers = if workers == 0 {
            warn!(
                workers,
                default = default.workers,
                "Invalid worker count, using default"
            );
            default.workers
        } else {
            workers
        };

        let queue_size = if queue_size == 0 {
            warn!(
                queue_size,
                default = default.queue_size,
                "Invalid queue size, using default"
            );
            default.queue_size
        } else {
            queue_size
        };

        Self {
            workers,
            queue_size,
            processing_delay,
        }
    }
}

/// What a worker does with one job
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process a pending transaction and return it in its final state
    ///
    /// Implementations should return `LedgerError::Cancelled` promptly once
    /// `cancel` fires, and must not leave money half-moved when they do.
    async fn handle(
        &self,
        job: Transaction,
        cancel: &CancellationToken,
    ) -> Result<Transaction, LedgerError>;
}

/// Mark the job completed without moving money
///
/// Paired with `PoolConfig::processing_delay` it stands in for a slow
/// downstream processor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedProcessing;

#[async_trait]
impl JobHandler for SimulatedProcessing {
    async fn handle(
        &self,
        mut job: Transaction,
        cancel: &CancellationToken,
    ) -> Result<Transaction, LedgerError> {
        if cancel.is_cancelled() {
            return Err(LedgerError::Cancelled {
                step: "processing job",
            });
        }
        job.complete()?;
        Ok(job)
    }
}

/// Settle jobs for real through the ledger
#[async_trait]
impl<S: LedgerStore> JobHandler for TransactionService<S> {
    async fn handle(
        &self,
        job: Transaction,
        cancel: &CancellationToken,
    ) -> Result<Transaction, LedgerError> {
        self.settle_with(job, cancel).await
    }
}

/// Outcome of one job
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingResult {
    /// The job in its final state
    pub transaction: Transaction,

    /// The result of processing (success or error)
    pub result: Result<(), LedgerError>,
}

impl ProcessingResult {
    fn from_outcome(job: Transaction, outcome: Result<Transaction, LedgerError>) -> Self {
        match outcome {
            Ok(transaction) => Self {
                transaction,
                result: Ok(()),
            },
            Err(e) => Self::failed(job, e),
        }
    }

    pub(crate) fn failed(mut transaction: Transaction, error: LedgerError) -> Self {
        if let Err(e) = transaction.fail(error.to_string()) {
            debug!(tx_id = transaction.id, error = %e, "Job was not pending");
        }
        Self {
            transaction,
            result: Err(error),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.result.is_ok()
    }
}

/// Fixed-size pool of workers sharing one bounded job queue
///
/// Protocol: [`start`](Self::start), any number of [`add_job`](Self::add_job),
/// exactly one [`close_jobs`](Self::close_jobs), then [`wait`](Self::wait).
/// Drain [`results`](Self::results) concurrently; the results channel closes
/// once `wait` returns.
pub struct WorkerPool<H> {
    config: PoolConfig,
    handler: Arc<H>,
    stats: Arc<StatsTracker>,
    cancel: CancellationToken,
    jobs_tx: Mutex<Option<mpsc::Sender<Transaction>>>,
    jobs_rx: Arc<AsyncMutex<mpsc::Receiver<Transaction>>>,
    results_tx: Mutex<Option<mpsc::Sender<ProcessingResult>>>,
    results_rx: Mutex<Option<mpsc::Receiver<ProcessingResult>>>,
    workers: Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl<H: JobHandler + 'static> WorkerPool<H> {
    pub fn new(
        config: PoolConfig,
        handler: Arc<H>,
        stats: Arc<StatsTracker>,
        cancel: CancellationToken,
    ) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::channel(config.queue_size);
        let (results_tx, results_rx) = mpsc::channel(config.queue_size);

        Self {
            config,
            handler,
            stats,
            cancel,
            jobs_tx: Mutex::new(Some(jobs_tx)),
            jobs_rx: Arc::new(AsyncMutex::new(jobs_rx)),
            results_tx: Mutex::new(Some(results_tx)),
            results_rx: Mutex::new(Some(results_rx)),
            workers: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Launch the workers
    pub fn start(&self) -> Result<(), LedgerError> {
        let mut workers = lock(&self.workers);
        if workers.is_some() {
            return Err(LedgerError::PoolAlreadyStarted);
        }

        let results = lock(&self.results_tx)
            .clone()
            .ok_or(LedgerError::PoolAlreadyStarted)?;

        let handles = (0..self.config.workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    delay: self.config.processing_delay,
                    jobs: Arc::clone(&self.jobs_rx),
                    results: results.clone(),
                    handler: Arc::clone(&self.handler),
                    stats: Arc::clone(&self.stats),
                    cancel: self.cancel.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        *workers = Some(handles);

        info!(workers = self.config.workers, "Worker pool started");
        Ok(())
    }

    /// Enqueue one job, waiting while the queue is full
    pub async fn add_job(&self, job: Transaction) -> Result<(), LedgerError> {
        let sender = lock(&self.jobs_tx).clone().ok_or(LedgerError::PoolClosed)?;

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(LedgerError::Cancelled {
                step: "queueing job",
            }),
            sent = sender.send(job) => sent.map_err(|_| LedgerError::PoolClosed),
        }
    }

    /// Signal that no more jobs will be added
    pub fn close_jobs(&self) -> Result<(), LedgerError> {
        match lock(&self.jobs_tx).take() {
            Some(_) => {
                debug!("Job queue closed");
                Ok(())
            }
            None => Err(LedgerError::PoolClosed),
        }
    }

    /// Take the results receiver; only the first call gets it
    pub fn results(&self) -> Option<mpsc::Receiver<ProcessingResult>> {
        lock(&self.results_rx).take()
    }

    /// Wait for every worker to exit
    ///
    /// Jobs left in the queue (only possible after cancellation) are reported
    /// as failed. Closes the results channel. Does not return until
    /// `close_jobs` has been called or the pool is cancelled.
    pub async fn wait(&self) {
        let handles = lock(&self.workers).take().unwrap_or_default();

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task panicked");
            }
        }

        let Some(results) = lock(&self.results_tx).take() else {
            return;
        };

        let mut jobs = self.jobs_rx.lock().await;
        while let Ok(job) = jobs.try_recv() {
            let aborted = LedgerError::Cancelled {
                step: "waiting in queue",
            };
            emit(&results, &self.stats, ProcessingResult::failed(job, aborted)).await;
        }

        info!(stats = ?self.stats.snapshot(), "Worker pool stopped");
    }
}

struct Worker<H> {
    id: usize,
    delay: Duration,
    jobs: Arc<AsyncMutex<mpsc::Receiver<Transaction>>>,
    results: mpsc::Sender<ProcessingResult>,
    handler: Arc<H>,
    stats: Arc<StatsTracker>,
    cancel: CancellationToken,
}

impl<H: JobHandler> Worker<H> {
    async fn run(self) {
        debug!(worker = self.id, "Worker started");

        while let Some(job) = self.next_job().await {
            debug!(worker = self.id, tx_id = job.id, "Processing job");
            let outcome = match self.simulate_latency().await {
                Ok(()) => self.handler.handle(job.clone(), &self.cancel).await,
                Err(e) => Err(e),
            };
            emit(
                &self.results,
                &self.stats,
                ProcessingResult::from_outcome(job, outcome),
            )
            .await;
        }

        debug!(worker = self.id, "Worker exiting");
    }

    async fn simulate_latency(&self) -> Result<(), LedgerError> {
        if self.delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(LedgerError::Cancelled {
                step: "processing job",
            }),
            _ = tokio::time::sleep(self.delay) => Ok(()),
        }
    }

    /// Next job, or `None` once the queue is closed and drained or the pool
    /// is cancelled
    async fn next_job(&self) -> Option<Transaction> {
        let mut jobs = self.jobs.lock().await;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            job = jobs.recv() => job,
        }
    }
}

async fn emit(
    results: &mpsc::Sender<ProcessingResult>,
    stats: &StatsTracker,
    result: ProcessingResult,
) {
    match &result.result {
        Ok(()) => stats.record_completed(),
        Err(_) => stats.record_failed(),
    }

    if results.send(result).await.is_err() {
        debug!("Results receiver dropped, discarding result");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory_store::MemoryStore;
    use crate::types::{NewTransaction, TransactionStatus};
    use rstest::rstest;
    use rust_decimal::Decimal;
    use std::collections::HashSet;

    fn jobs(count: i64) -> Vec<Transaction> {
        (1..=count)
            .map(|id| Transaction::pending(id, NewTransaction::deposit(1, Decimal::ONE)))
            .collect()
    }

    fn simulated_pool(
        workers: usize,
        queue_size: usize,
        delay: Duration,
    ) -> (WorkerPool<SimulatedProcessing>, Arc<StatsTracker>, CancellationToken) {
        let stats = Arc::new(StatsTracker::new());
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(
            PoolConfig::new(workers, queue_size, delay),
            Arc::new(SimulatedProcessing),
            Arc::clone(&stats),
            cancel.clone(),
        );
        (pool, stats, cancel)
    }

    async fn collect(mut results: mpsc::Receiver<ProcessingResult>) -> Vec<ProcessingResult> {
        let mut collected = Vec::new();
        while let Some(result) = results.recv().await {
            collected.push(result);
        }
        collected
    }

    #[rstest]
    #[case::single_worker(1, 10)]
    #[case::more_jobs_than_workers(3, 25)]
    #[case::more_workers_than_jobs(8, 4)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_job_yields_one_completed_result(
        #[case] workers: usize,
        #[case] count: i64,
    ) {
        let (pool, stats, _) = simulated_pool(workers, count as usize, Duration::from_millis(1));
        let results = pool.results().unwrap();
        let collector = tokio::spawn(collect(results));

        pool.start().unwrap();
        for job in jobs(count) {
            pool.add_job(job).await.unwrap();
        }
        pool.close_jobs().unwrap();
        pool.wait().await;

        let results = collector.await.unwrap();
        assert_eq!(results.len(), count as usize);
        assert!(results.iter().all(|r| r.is_completed()));
        assert!(results
            .iter()
            .all(|r| r.transaction.status == TransactionStatus::Completed));

        let ids: HashSet<_> = results.iter().map(|r| r.transaction.id).collect();
        assert_eq!(ids, (1..=count).collect::<HashSet<_>>());
        assert_eq!(stats.snapshot().completed, count as u64);
        assert_eq!(stats.snapshot().failed, 0);
    }

    #[tokio::test]
    async fn test_add_job_after_close_is_rejected() {
        let (pool, _, _) = simulated_pool(1, 4, Duration::ZERO);
        pool.start().unwrap();
        pool.close_jobs().unwrap();

        let result = pool.add_job(jobs(1).remove(0)).await;

        assert_eq!(result, Err(LedgerError::PoolClosed));
        pool.wait().await;
    }

    #[tokio::test]
    async fn test_close_twice_is_rejected() {
        let (pool, _, _) = simulated_pool(1, 4, Duration::ZERO);

        pool.close_jobs().unwrap();

        assert_eq!(pool.close_jobs(), Err(LedgerError::PoolClosed));
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let (pool, _, _) = simulated_pool(2, 4, Duration::ZERO);
        pool.start().unwrap();

        assert_eq!(pool.start(), Err(LedgerError::PoolAlreadyStarted));

        pool.close_jobs().unwrap();
        pool.wait().await;
    }

    #[tokio::test]
    async fn test_results_can_be_taken_once() {
        let (pool, _, _) = simulated_pool(1, 4, Duration::ZERO);

        assert!(pool.results().is_some());
        assert!(pool.results().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_delay_applies_to_every_job() {
        let (pool, stats, _) = simulated_pool(1, 3, Duration::from_secs(2));
        let collector = tokio::spawn(collect(pool.results().unwrap()));
        let started = tokio::time::Instant::now();

        pool.start().unwrap();
        for job in jobs(3) {
            pool.add_job(job).await.unwrap();
        }
        pool.close_jobs().unwrap();
        pool.wait().await;

        assert!(started.elapsed() >= Duration::from_secs(6));
        assert_eq!(collector.await.unwrap().len(), 3);
        assert_eq!(stats.snapshot().completed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_delay_delays_service_settlement() {
        let store = Arc::new(MemoryStore::with_balances([(1, Decimal::ZERO)]));
        let service = TransactionService::new(Arc::clone(&store));
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(
            PoolConfig::new(1, 4, Duration::from_secs(10)),
            Arc::new(service.clone()),
            Arc::new(StatsTracker::new()),
            cancel.clone(),
        );
        let collector = tokio::spawn(collect(pool.results().unwrap()));

        pool.start().unwrap();
        for _ in 0..2 {
            let pending = service
                .submit(NewTransaction::deposit(1, Decimal::ONE))
                .await
                .unwrap();
            pool.add_job(pending).await.unwrap();
        }
        pool.close_jobs().unwrap();

        // Partway through the first job's latency nothing has settled
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(service.balance(1).await.unwrap().amount, Decimal::ZERO);

        cancel.cancel();
        pool.wait().await;

        let results = collector.await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.is_completed()));
        assert_eq!(service.balance(1).await.unwrap().amount, Decimal::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_jobs_are_reported_failed() {
        let (pool, stats, cancel) = simulated_pool(2, 10, Duration::from_secs(3600));
        let collector = tokio::spawn(collect(pool.results().unwrap()));

        pool.start().unwrap();
        for job in jobs(10) {
            pool.add_job(job).await.unwrap();
        }
        pool.close_jobs().unwrap();
        cancel.cancel();
        pool.wait().await;

        let results = collector.await.unwrap();
        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| matches!(
            r.result,
            Err(LedgerError::Cancelled { .. })
        )));
        assert!(results
            .iter()
            .all(|r| r.transaction.status == TransactionStatus::Failed));
        assert_eq!(stats.snapshot().failed, 10);
    }

    #[tokio::test]
    async fn test_add_job_after_cancel_is_rejected() {
        let (pool, _, cancel) = simulated_pool(1, 4, Duration::ZERO);
        cancel.cancel();

        let result = pool.add_job(jobs(1).remove(0)).await;

        assert!(matches!(result, Err(LedgerError::Cancelled { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_service_handler_settles_transfers() {
        let store = Arc::new(MemoryStore::with_balances([
            (1, Decimal::new(100, 0)),
            (2, Decimal::ZERO),
        ]));
        let service = TransactionService::new(Arc::clone(&store));
        let stats = Arc::new(StatsTracker::new());
        let pool = WorkerPool::new(
            PoolConfig::new(4, 20, Duration::ZERO),
            Arc::new(service.clone()),
            Arc::clone(&stats),
            CancellationToken::new(),
        );
        let collector = tokio::spawn(collect(pool.results().unwrap()));

        pool.start().unwrap();
        for _ in 0..20 {
            let pending = service
                .submit(NewTransaction::transfer(1, 2, Decimal::new(10, 0)))
                .await
                .unwrap();
            pool.add_job(pending).await.unwrap();
        }
        pool.close_jobs().unwrap();
        pool.wait().await;

        let results = collector.await.unwrap();
        assert_eq!(results.len(), 20);
        assert_eq!(stats.snapshot().completed, 10);
        assert_eq!(stats.snapshot().failed, 10);
        assert!(results
            .iter()
            .filter(|r| !r.is_completed())
            .all(|r| matches!(r.result, Err(LedgerError::InsufficientFunds { .. }))));
        assert_eq!(service.balance(1).await.unwrap().amount, Decimal::ZERO);
        assert_eq!(
            service.balance(2).await.unwrap().amount,
            Decimal::new(100, 0)
        );
    }

    #[rstest]
    #[case::zero_workers(0, 10, PoolConfig::default().workers, 10)]
    #[case::zero_queue(4, 0, 4, 1000)]
    #[case::valid(2, 50, 2, 50)]
    fn test_pool_config_falls_back_on_zero(
        #[case] workers: usize,
        #[case] queue_size: usize,
        #[case] expected_workers: usize,
        #[case] expected_queue: usize,
    ) {
        let config = PoolConfig::new(workers, queue_size, Duration::ZERO);

        assert_eq!(config.workers, expected_workers);
        assert_eq!(config.queue_size, expected_queue);
    }
}
