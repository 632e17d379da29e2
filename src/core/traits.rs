//! Storage abstraction the ledger core depends on
//!
//! The core never assumes how or where data is durably stored. A backend only
//! has to provide the operations below; `MemoryStore` is the in-process
//! implementation used by the CLI and the tests.

use std::sync::Arc;

use async_trait::async_trait;

use crate::types::{
    Balance, BalanceHistory, BalanceSnapshot, NewTransaction, StoreError, Transaction,
    TransactionId, TransactionStatus, UserId,
};

/// One requested status change of a pending transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub id: TransactionId,
    pub status: TransactionStatus,
    pub reason: Option<String>,
}

impl StatusChange {
    pub fn new(id: TransactionId, status: TransactionStatus) -> Self {
        Self {
            id,
            status,
            reason: None,
        }
    }
}

/// Persistence operations for balances, transactions and history
///
/// Balances are handed out as shared handles: every caller asking for the same
/// account must receive a handle to the same `Balance`, so that concurrent
/// mutations contend on one lock.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Get the balance handle of an existing account
    async fn balance(&self, user_id: UserId) -> Result<Arc<Balance>, StoreError>;

    /// Get the balance handle of an account, creating it at zero if needed
    async fn open_balance(&self, user_id: UserId) -> Result<Arc<Balance>, StoreError>;

    /// Persist one balance (upsert)
    async fn save_balance(&self, balance: &BalanceSnapshot) -> Result<(), StoreError>;

    /// Persist several balances in one atomic write
    ///
    /// Either every snapshot is stored or none is.
    async fn save_balances(&self, balances: &[BalanceSnapshot]) -> Result<(), StoreError>;

    /// Store a new transaction in `pending` state and assign its id
    async fn create_transaction(&self, draft: NewTransaction) -> Result<Transaction, StoreError>;

    /// Load a transaction by id
    async fn transaction(&self, id: TransactionId) -> Result<Transaction, StoreError>;

    /// Move a pending transaction to `status`
    ///
    /// Must behave as a compare-and-set: when the stored record is no longer
    /// pending the call fails with `StoreError::Conflict` and nothing changes.
    async fn update_transaction_status(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        reason: Option<String>,
    ) -> Result<Transaction, StoreError>;

    /// Apply several status changes in one atomic write
    ///
    /// Every change is a compare-and-set as in
    /// [`update_transaction_status`](Self::update_transaction_status). If any
    /// of them fails, none is applied. Returns the updated records in the
    /// order of `changes`.
    async fn update_transaction_statuses(
        &self,
        changes: &[StatusChange],
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Append a balance history record
    async fn create_history(&self, entry: BalanceHistory) -> Result<(), StoreError>;
}
