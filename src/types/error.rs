//! Error types for the ledger
//!
//! `LedgerError` is what callers of the service and the worker pool see.
//! `StoreError` is what a storage backend reports; the service wraps it with
//! the step that was running when it happened.
//!
//! # Error Categories
//!
//! - **Validation**: invalid amount, self transfer, missing party
//! - **Business rules**: insufficient funds, invalid state transition, wrong type
//! - **Lookup**: account or transaction not found
//! - **Infrastructure**: storage failure, cancellation, failed compensation
//! - **Worker pool**: queue closed, pool already started

use std::fmt;

use rust_decimal::Decimal;
use thiserror::Error;

use super::transaction::{TransactionId, TransactionStatus, TransactionType, UserId};

/// Something the ledger can look up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Account(UserId),
    Transaction(TransactionId),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Account(id) => write!(f, "Account {}", id),
            Entity::Transaction(id) => write!(f, "Transaction {}", id),
        }
    }
}

/// Errors reported by a storage backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The requested record does not exist
    #[error("{0} not found")]
    NotFound(Entity),

    /// A status update found the record outside of `pending`
    #[error("Transaction {tx} is {current}, cannot become {requested}")]
    Conflict {
        tx: TransactionId,
        current: TransactionStatus,
        requested: TransactionStatus,
    },

    /// The backend could not complete the operation
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Main error type for the ledger
///
/// Every variant is distinguishable so a boundary layer (CLI, HTTP, ...) can
/// map it to a response without parsing messages.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// Amount was zero or negative
    #[error("Invalid amount {amount}: must be greater than zero")]
    InvalidAmount { amount: Decimal },

    /// A debit would drive the balance negative
    ///
    /// The balance is left unchanged.
    #[error("Insufficient funds for user {user_id}: available {available}, requested {requested}")]
    InsufficientFunds {
        user_id: UserId,
        available: Decimal,
        requested: Decimal,
    },

    /// Source and destination of a transfer are the same account
    #[error("User {user_id} cannot transfer to their own account")]
    SelfTransfer { user_id: UserId },

    /// Status change attempted on a transaction that is not pending
    #[error("Transaction {tx} cannot move from {from} to {to} while {step}")]
    InvalidStateTransition {
        step: &'static str,
        tx: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Operation applied to a transaction of the wrong type
    #[error("Transaction {tx} is a {actual}, expected a {expected}")]
    WrongType {
        tx: TransactionId,
        expected: TransactionType,
        actual: TransactionType,
    },

    /// Missing account or transaction
    #[error("{entity} not found while {step}")]
    NotFound { step: &'static str, entity: Entity },

    /// A transaction record lacks the account its type requires
    #[error("{tx_type} transaction has no {party} account")]
    MissingParty {
        tx_type: TransactionType,
        party: &'static str,
    },

    /// Checked decimal arithmetic overflowed
    #[error("Arithmetic overflow in {operation} for user {user_id}")]
    ArithmeticOverflow {
        operation: &'static str,
        user_id: UserId,
    },

    /// Wraps any storage backend failure with the step that was running
    #[error("Storage failure while {step}: {source}")]
    Storage {
        step: &'static str,
        source: StoreError,
    },

    /// The operation observed a cancellation signal before moving money
    #[error("Cancelled while {step}")]
    Cancelled { step: &'static str },

    /// Reverting a partially applied transaction failed
    ///
    /// The ledger needs manual attention for the named transaction.
    #[error("Compensation for transaction {tx} failed: {message}")]
    CompensationFailed { tx: TransactionId, message: String },

    /// A job was submitted after the pool's queue was closed
    #[error("Worker pool job queue is closed")]
    PoolClosed,

    /// `start` was called on a pool whose workers are already running
    #[error("Worker pool is already started")]
    PoolAlreadyStarted,
}

// Helper functions for creating common errors

impl LedgerError {
    /// Create an InvalidAmount error
    pub fn invalid_amount(amount: Decimal) -> Self {
        LedgerError::InvalidAmount { amount }
    }

    /// Create an InsufficientFunds error
    pub fn insufficient_funds(user_id: UserId, available: Decimal, requested: Decimal) -> Self {
        LedgerError::InsufficientFunds {
            user_id,
            available,
            requested,
        }
    }

    /// Create an InvalidStateTransition error
    pub fn invalid_transition(
        step: &'static str,
        tx: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> Self {
        LedgerError::InvalidStateTransition { step, tx, from, to }
    }

    /// Create a NotFound error
    pub fn not_found(step: &'static str, entity: Entity) -> Self {
        LedgerError::NotFound { step, entity }
    }

    /// Create a MissingParty error
    pub fn missing_party(tx_type: TransactionType, party: &'static str) -> Self {
        LedgerError::MissingParty { tx_type, party }
    }

    /// Create an ArithmeticOverflow error
    pub fn arithmetic_overflow(operation: &'static str, user_id: UserId) -> Self {
        LedgerError::ArithmeticOverflow { operation, user_id }
    }

    /// Wrap a storage error with the step that failed
    ///
    /// Lookups and status conflicts keep their specific kind; everything else
    /// becomes `Storage`. The step is kept either way.
    pub fn from_store(step: &'static str, error: StoreError) -> Self {
        match error {
            StoreError::NotFound(entity) => LedgerError::not_found(step, entity),
            StoreError::Conflict {
                tx,
                current,
                requested,
            } => LedgerError::invalid_transition(step, tx, current, requested),
            source => LedgerError::Storage { step, source },
        }
    }

    /// Closure form of [`LedgerError::from_store`] for `map_err`
    pub fn at(step: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |error| Self::from_store(step, error)
    }
}
