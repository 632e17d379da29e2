//! Thread-safe in-memory ledger storage
//!
//! This module provides the `MemoryStore` struct, an implementation of
//! [`LedgerStore`] backed by concurrent maps.
//!
//! # Design
//!
//! `MemoryStore` uses `DashMap` (a concurrent HashMap) for fine-grained
//! locking, so operations on different accounts or transactions proceed in
//! parallel while operations on the same entry are serialized.
//!
//! Two views of every account are kept:
//! - the live `Arc<Balance>` handle, published by the service after a commit
//! - the committed `BalanceSnapshot` written by `save_balance(s)`
//!
//! The committed view is what a durable backend would hold. Multi-key commits
//! take a commit lock so readers never observe half of a transfer. Status
//! changes take a status lock, so a multi-record change is all or nothing.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::core::traits::{LedgerStore, StatusChange};
use crate::types::{
    Balance, BalanceHistory, BalanceSnapshot, Entity, NewTransaction, StoreError, Transaction,
    TransactionId, TransactionStatus, UserId,
};

/// In-memory ledger storage
///
/// All methods are safe to call from many tasks at once. Transaction ids start
/// at 1 and increase monotonically.
#[derive(Debug)]
pub struct MemoryStore {
    /// Live balance handles, one per account
    balances: DashMap<UserId, Arc<Balance>>,

    /// Last persisted value of each balance
    committed: DashMap<UserId, BalanceSnapshot>,

    /// Serializes multi-key commits against each other and against readers
    commit_lock: Mutex<()>,

    transactions: DashMap<TransactionId, Transaction>,

    /// Serializes status changes so a multi-record change is all or nothing
    status_lock: Mutex<()>,

    /// Append-only history, grouped by account
    history: DashMap<UserId, Vec<BalanceHistory>>,

    next_id: AtomicI64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            balances: DashMap::new(),
            committed: DashMap::new(),
            commit_lock: Mutex::new(()),
            transactions: DashMap::new(),
            status_lock: Mutex::new(()),
            history: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Create a store with pre-existing, already committed accounts
    pub fn with_balances<I>(balances: I) -> Self
    where
        I: IntoIterator<Item = (UserId, Decimal)>,
    {
        let store = Self::new();
        for (user_id, amount) in balances {
            let balance = Balance::new(user_id, amount);
            store.committed.insert(user_id, balance.snapshot());
            store.balances.insert(user_id, Arc::new(balance));
        }
        store
    }

    /// Last committed snapshot of an account, if it was ever persisted
    pub fn committed_balance(&self, user_id: UserId) -> Option<BalanceSnapshot> {
        let _guard = self.lock_commits();
        self.committed.get(&user_id).map(|entry| *entry.value())
    }

    /// Snapshots of all live balances, sorted by user id
    pub fn balances(&self) -> Vec<BalanceSnapshot> {
        let mut snapshots: Vec<BalanceSnapshot> = self
            .balances
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.user_id);
        snapshots
    }

    /// History records of one account, oldest first
    pub fn history(&self, user_id: UserId) -> Vec<BalanceHistory> {
        self.history
            .get(&user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// All transactions, sorted by id
    pub fn transactions(&self) -> Vec<Transaction> {
        let mut transactions: Vec<Transaction> = self
            .transactions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        transactions.sort_by_key(|tx| tx.id);
        transactions
    }

    /// Upsert a snapshot unless a newer one is already committed
    ///
    /// Two writers racing on one account may persist out of order; the
    /// mutation timestamp decides which value is kept.
    fn commit(&self, snapshot: &BalanceSnapshot) {
        self.committed
            .entry(snapshot.user_id)
            .and_modify(|current| {
                if snapshot.last_updated_at >= current.last_updated_at {
                    *current = *snapshot;
                }
            })
            .or_insert(*snapshot);
    }

    /// Check every change against the stored record, then write them all
    fn apply_status_changes(
        &self,
        changes: &[StatusChange],
    ) -> Result<Vec<Transaction>, StoreError> {
        let _guard = lock(&self.status_lock);

        let mut updated = Vec::with_capacity(changes.len());
        for change in changes {
            let mut transaction = self
                .transactions
                .get(&change.id)
                .map(|entry| entry.value().clone())
                .ok_or(StoreError::NotFound(Entity::Transaction(change.id)))?;

            let current = transaction.status;
            transaction
                .transition(change.status, change.reason.clone())
                .map_err(|_| StoreError::Conflict {
                    tx: change.id,
                    current,
                    requested: change.status,
                })?;
            updated.push(transaction);
        }

        for transaction in &updated {
            self.transactions.insert(transaction.id, transaction.clone());
        }

        Ok(updated)
    }

    fn lock_commits(&self) -> MutexGuard<'_, ()> {
        lock(&self.commit_lock)
    }
}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn balance(&self, user_id: UserId) -> Result<Arc<Balance>, StoreError> {
        self.balances
            .get(&user_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(StoreError::NotFound(Entity::Account(user_id)))
    }

    async fn open_balance(&self, user_id: UserId) -> Result<Arc<Balance>, StoreError> {
        let entry = self
            .balances
            .entry(user_id)
            .or_insert_with(|| Arc::new(Balance::new(user_id, Decimal::ZERO)));
        Ok(Arc::clone(entry.value()))
    }

    async fn save_balance(&self, balance: &BalanceSnapshot) -> Result<(), StoreError> {
        let _guard = self.lock_commits();
        self.commit(balance);
        Ok(())
    }

    async fn save_balances(&self, balances: &[BalanceSnapshot]) -> Result<(), StoreError> {
        let _guard = self.lock_commits();
        for snapshot in balances {
            self.commit(snapshot);
        }
        Ok(())
    }

    async fn create_transaction(&self, draft: NewTransaction) -> Result<Transaction, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let transaction = Transaction::pending(id, draft);
        self.transactions.insert(id, transaction.clone());
        Ok(transaction)
    }

    async fn transaction(&self, id: TransactionId) -> Result<Transaction, StoreError> {
        self.transactions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound(Entity::Transaction(id)))
    }

    async fn update_transaction_status(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        reason: Option<String>,
    ) -> Result<Transaction, StoreError> {
        let change = StatusChange { id, status, reason };
        self.apply_status_changes(std::slice::from_ref(&change))?
            .pop()
            .ok_or(StoreError::NotFound(Entity::Transaction(id)))
    }

    async fn update_transaction_statuses(
        &self,
        changes: &[StatusChange],
    ) -> Result<Vec<Transaction>, StoreError> {
        self.apply_status_changes(changes)
    }

    async fn create_history(&self, entry: BalanceHistory) -> Result<(), StoreError> {
        self.history.entry(entry.user_id).or_default().push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_balance_missing_account() {
        let store = MemoryStore::new();

        let result = store.balance(1).await;

        assert_eq!(result.unwrap_err(), StoreError::NotFound(Entity::Account(1)));
    }

    #[tokio::test]
    async fn test_open_balance_creates_zero_balance() {
        let store = MemoryStore::new();

        let balance = store.open_balance(5).await.unwrap();

        assert_eq!(balance.user_id(), 5);
        assert_eq!(balance.amount(), Decimal::ZERO);
        // Opening does not commit anything
        assert!(store.committed_balance(5).is_none());
    }

    #[tokio::test]
    async fn test_handles_are_shared_per_account() {
        let store = MemoryStore::new();

        let first = store.open_balance(1).await.unwrap();
        let second = store.balance(1).await.unwrap();
        first.credit(Decimal::TEN).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.amount(), Decimal::TEN);
    }

    #[tokio::test]
    async fn test_with_balances_commits_initial_state() {
        let store = MemoryStore::with_balances([(1, Decimal::new(50, 0)), (2, Decimal::ZERO)]);

        assert_eq!(
            store.committed_balance(1).map(|s| s.amount),
            Some(Decimal::new(50, 0))
        );
        assert_eq!(store.balances().len(), 2);
        assert_eq!(store.balances()[0].user_id, 1);
    }

    #[tokio::test]
    async fn test_save_balances_commits_every_snapshot() {
        let store = MemoryStore::new();
        let a = Balance::new(1, Decimal::new(10, 0)).snapshot();
        let b = Balance::new(2, Decimal::new(20, 0)).snapshot();

        store.save_balances(&[a, b]).await.unwrap();

        assert_eq!(store.committed_balance(1), Some(a));
        assert_eq!(store.committed_balance(2), Some(b));
    }

    #[tokio::test]
    async fn test_stale_snapshot_does_not_overwrite_newer_one() {
        let store = MemoryStore::new();
        let stale = Balance::new(1, Decimal::new(10, 0)).snapshot();
        let fresh = BalanceSnapshot {
            amount: Decimal::new(15, 0),
            last_updated_at: stale.last_updated_at + chrono::Duration::seconds(1),
            ..stale
        };

        store.save_balance(&fresh).await.unwrap();
        store.save_balance(&stale).await.unwrap();

        assert_eq!(store.committed_balance(1), Some(fresh));
    }

    #[tokio::test]
    async fn test_create_transaction_assigns_unique_ids() {
        let store = Arc::new(MemoryStore::new());

        let mut tasks = Vec::new();
        for i in 0..50 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store
                    .create_transaction(NewTransaction::deposit(i, Decimal::ONE))
                    .await
                    .unwrap()
                    .id
            }));
        }

        let mut ids = HashSet::new();
        for task in tasks {
            assert!(ids.insert(task.await.unwrap()));
        }
        assert_eq!(ids.len(), 50);
        assert!(store
            .transactions()
            .iter()
            .all(|tx| tx.status == TransactionStatus::Pending));
    }

    #[tokio::test]
    async fn test_update_status_is_compare_and_set() {
        let store = MemoryStore::new();
        let tx = store
            .create_transaction(NewTransaction::transfer(1, 2, Decimal::ONE))
            .await
            .unwrap();

        let updated = store
            .update_transaction_status(tx.id, TransactionStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(updated.status, TransactionStatus::Completed);

        let second = store
            .update_transaction_status(tx.id, TransactionStatus::RolledBack, None)
            .await;
        assert_eq!(
            second.unwrap_err(),
            StoreError::Conflict {
                tx: tx.id,
                current: TransactionStatus::Completed,
                requested: TransactionStatus::RolledBack,
            }
        );
        assert_eq!(
            store.transaction(tx.id).await.unwrap().status,
            TransactionStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_update_status_persists_failure_reason() {
        let store = MemoryStore::new();
        let tx = store
            .create_transaction(NewTransaction::withdrawal(1, Decimal::ONE))
            .await
            .unwrap();

        store
            .update_transaction_status(
                tx.id,
                TransactionStatus::Failed,
                Some("insufficient funds".to_string()),
            )
            .await
            .unwrap();

        let stored = store.transaction(tx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("insufficient funds"));
    }

    #[tokio::test]
    async fn test_update_statuses_applies_all_changes() {
        let store = MemoryStore::new();
        let original = store
            .create_transaction(NewTransaction::transfer(1, 2, Decimal::ONE))
            .await
            .unwrap();
        let reversal = store
            .create_transaction(NewTransaction::transfer(2, 1, Decimal::ONE))
            .await
            .unwrap();

        let updated = store
            .update_transaction_statuses(&[
                StatusChange::new(original.id, TransactionStatus::RolledBack),
                StatusChange::new(reversal.id, TransactionStatus::Completed),
            ])
            .await
            .unwrap();

        assert_eq!(updated.len(), 2);
        assert_eq!(updated[0].status, TransactionStatus::RolledBack);
        assert_eq!(updated[1].status, TransactionStatus::Completed);
        assert_eq!(store.transaction(original.id).await.unwrap(), updated[0]);
        assert_eq!(store.transaction(reversal.id).await.unwrap(), updated[1]);
    }

    #[tokio::test]
    async fn test_update_statuses_conflict_changes_nothing() {
        let store = MemoryStore::new();
        let original = store
            .create_transaction(NewTransaction::transfer(1, 2, Decimal::ONE))
            .await
            .unwrap();
        let reversal = store
            .create_transaction(NewTransaction::transfer(2, 1, Decimal::ONE))
            .await
            .unwrap();
        store
            .update_transaction_status(reversal.id, TransactionStatus::Failed, None)
            .await
            .unwrap();

        let result = store
            .update_transaction_statuses(&[
                StatusChange::new(original.id, TransactionStatus::RolledBack),
                StatusChange::new(reversal.id, TransactionStatus::Completed),
            ])
            .await;

        assert_eq!(
            result.unwrap_err(),
            StoreError::Conflict {
                tx: reversal.id,
                current: TransactionStatus::Failed,
                requested: TransactionStatus::Completed,
            }
        );
        assert_eq!(
            store.transaction(original.id).await.unwrap().status,
            TransactionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_update_status_missing_transaction() {
        let store = MemoryStore::new();

        let result = store
            .update_transaction_status(42, TransactionStatus::Completed, None)
            .await;

        assert_eq!(
            result.unwrap_err(),
            StoreError::NotFound(Entity::Transaction(42))
        );
    }

    #[tokio::test]
    async fn test_concurrent_status_updates_only_one_wins() {
        let store = Arc::new(MemoryStore::new());
        let tx = store
            .create_transaction(NewTransaction::transfer(1, 2, Decimal::ONE))
            .await
            .unwrap();
        let id = tx.id;

        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            let status = if i % 2 == 0 {
                TransactionStatus::Completed
            } else {
                TransactionStatus::RolledBack
            };
            tasks.push(tokio::spawn(async move {
                store
                    .update_transaction_status(id, status, None)
                    .await
                    .is_ok()
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_history_is_grouped_and_ordered() {
        let store = MemoryStore::new();

        store
            .create_history(BalanceHistory::new(1, Decimal::new(10, 0), 1))
            .await
            .unwrap();
        store
            .create_history(BalanceHistory::new(2, Decimal::new(5, 0), 2))
            .await
            .unwrap();
        store
            .create_history(BalanceHistory::new(1, Decimal::new(15, 0), 3))
            .await
            .unwrap();

        let history = store.history(1);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].triggering_transaction, 1);
        assert_eq!(history[1].balance_after, Decimal::new(15, 0));
        assert!(store.history(3).is_empty());
    }
}
