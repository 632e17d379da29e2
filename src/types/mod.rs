//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `balance`: Per-account guarded balance and its snapshot
//! - `transaction`: Transaction records, identifiers and lifecycle
//! - `history`: Balance audit records
//! - `error`: Error types for the ledger

pub mod balance;
pub mod error;
pub mod history;
pub mod transaction;

pub use balance::{Balance, BalanceSnapshot};
pub use error::{Entity, LedgerError, StoreError};
pub use history::BalanceHistory;
pub use transaction::{
    NewTransaction, Transaction, TransactionId, TransactionStatus, TransactionType, UserId,
};
