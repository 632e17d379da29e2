//! Core ledger module
//!
//! This module contains the ledger components:
//! - `traits` - Storage abstraction the core depends on
//! - `memory_store` - In-memory storage backend
//! - `service` - Deposit, withdraw, transfer and rollback orchestration
//! - `stats` - Outcome counters
//! - `pool` - Worker pool over a bounded job queue
//! - `batch` - Batch submission with count-based aggregation

pub mod batch;
pub mod memory_store;
pub mod pool;
pub mod service;
pub mod stats;
pub mod traits;

pub use batch::{BatchProcessor, BatchReport};
pub use memory_store::MemoryStore;
pub use pool::{JobHandler, PoolConfig, ProcessingResult, SimulatedProcessing, WorkerPool};
pub use service::TransactionService;
pub use stats::{Stats, StatsTracker};
pub use traits::{LedgerStore, StatusChange};
