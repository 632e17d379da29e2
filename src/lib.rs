//! Rust Ledger Engine Library
//!
//! # Overview
//!
//! An in-process financial ledger: per-account balances, a recorded
//! lifecycle for every money movement, rollback of pending transfers, and
//! concurrent batch settlement through a fixed worker pool.
//!
//! # Architecture
//!
//! - [`types`] - Core data types (Balance, Transaction, BalanceHistory, errors)
//! - [`core`] - Ledger logic:
//!   - [`core::service`] - Deposit, withdraw, transfer and rollback
//!   - [`core::traits`] - Storage abstraction, with [`core::memory_store`] as the in-process backend
//!   - [`core::pool`] and [`core::batch`] - Worker pool and batch aggregation
//!   - [`core::stats`] - Completed/failed counters
//! - [`io`] - CSV request input and balance output
//! - [`strategy`] - Sequential and worker pool pipelines
//! - [`cli`] - CLI arguments parsing
//! - [`logging`] - Tracing setup
//!
//! # Transaction Lifecycle
//!
//! Every transaction is stored `pending` before any money moves and ends in
//! exactly one of:
//!
//! - **completed**: balances, history and status were all written
//! - **failed**: rejected or compensated; `failure_reason` says why
//! - **rolled_back**: a pending transfer reversed by `rollback`

pub mod cli;
pub mod core;
pub mod io;
pub mod logging;
pub mod strategy;
pub mod types;

pub use core::{LedgerStore, MemoryStore, StatsTracker, TransactionService, WorkerPool};
pub use io::write_balances_csv;
pub use types::{
    Balance, BalanceHistory, LedgerError, Transaction, TransactionId, TransactionStatus,
    TransactionType, UserId,
};
