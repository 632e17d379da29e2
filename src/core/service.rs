//! Ledger operations over a storage backend
//!
//! `TransactionService` orchestrates deposits, withdrawals, transfers and
//! rollbacks by composing `Balance` mutations with the `LedgerStore`
//! operations. It holds no per-call state.
//!
//! # Lifecycle of every operation
//!
//! ```text
//! validate ─▶ create pending record ─▶ load balances ─▶ lock accounts (id order)
//!                                                            │
//!          ┌──────────── stage new values (not visible) ◀────┘
//!          ▼
//!   save balances (one atomic write) ─▶ history ─▶ mark completed ─▶ publish
//!          │ any failure
//!          ▼
//!   restore saved balances ─▶ mark failed (with reason)
//! ```
//!
//! Money is never reported as moved before the balances, their history and
//! the completed status have all been written. Until then the new values
//! exist only as staged snapshots under the accounts' update locks, so no
//! other caller can observe or spend them.

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::traits::{LedgerStore, StatusChange};
use crate::types::{
    Balance, BalanceHistory, BalanceSnapshot, Entity, LedgerError, NewTransaction, Transaction,
    TransactionId, TransactionStatus, TransactionType, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Debit,
    Credit,
}

/// One balance change of a transaction
#[derive(Debug)]
struct Leg {
    balance: Arc<Balance>,
    direction: Direction,
    amount: Decimal,
}

impl Leg {
    /// Compute the balance this leg would leave, without publishing it
    fn stage(&self) -> Result<Staged, LedgerError> {
        let before = self.balance.snapshot();
        let after = match self.direction {
            Direction::Debit => before.debited(self.amount)?,
            Direction::Credit => before.credited(self.amount)?,
        };
        Ok(Staged {
            balance: Arc::clone(&self.balance),
            before,
            after,
        })
    }
}

/// A leg's balance before and after, not yet visible to other callers
#[derive(Debug)]
struct Staged {
    balance: Arc<Balance>,
    before: BalanceSnapshot,
    after: BalanceSnapshot,
}

/// How far a failed commit got, so compensation undoes only what was written
#[derive(Debug, Default)]
struct Progress {
    balances_saved: bool,
    history_written: usize,
}

/// Deposit, withdraw, transfer and rollback against a [`LedgerStore`]
pub struct TransactionService<S> {
    store: Arc<S>,
    cancel: CancellationToken,
}

impl<S> Clone for TransactionService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cancel: self.cancel.clone(),
        }
    }
}

impl<S: LedgerStore> TransactionService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_cancellation(store, CancellationToken::new())
    }

    /// Create a service whose operations stop before moving money once
    /// `cancel` fires
    pub fn with_cancellation(store: Arc<S>, cancel: CancellationToken) -> Self {
        Self { store, cancel }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Explicitly initialize an account at zero and persist it
    ///
    /// Opening an account that already exists returns its current balance.
    pub async fn open_account(&self, user_id: UserId) -> Result<BalanceSnapshot, LedgerError> {
        let balance = self
            .store
            .open_balance(user_id)
            .await
            .map_err(LedgerError::at("opening account"))?;

        let snapshot = balance.snapshot();
        self.store
            .save_balance(&snapshot)
            .await
            .map_err(LedgerError::at("saving balance"))?;

        Ok(snapshot)
    }

    /// Current balance of an existing account
    pub async fn balance(&self, user_id: UserId) -> Result<BalanceSnapshot, LedgerError> {
        let balance = self
            .store
            .balance(user_id)
            .await
            .map_err(LedgerError::at("loading balance"))?;
        Ok(balance.snapshot())
    }

    /// Credit `amount` to `user_id`, creating the account on first deposit
    pub async fn deposit(
        &self,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<Transaction, LedgerError> {
        let transaction = self.submit(NewTransaction::deposit(user_id, amount)).await?;
        self.execute(transaction, &self.cancel, None).await
    }

    /// Debit `amount` from an existing account
    pub async fn withdraw(
        &self,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<Transaction, LedgerError> {
        let transaction = self
            .submit(NewTransaction::withdrawal(user_id, amount))
            .await?;
        self.execute(transaction, &self.cancel, None).await
    }

    /// Move `amount` between two existing accounts
    ///
    /// Both balances are persisted in a single atomic storage write.
    pub async fn transfer(
        &self,
        from_user_id: UserId,
        to_user_id: UserId,
        amount: Decimal,
    ) -> Result<Transaction, LedgerError> {
        let transaction = self
            .submit(NewTransaction::transfer(from_user_id, to_user_id, amount))
            .await?;
        self.execute(transaction, &self.cancel, None).await
    }

    /// Reverse a pending transfer
    ///
    /// Executes a transfer in the opposite direction and marks the original
    /// `rolled_back` as part of the same commit. Returns the reversing
    /// transaction.
    pub async fn rollback(&self, transaction_id: TransactionId) -> Result<Transaction, LedgerError> {
        let original = self
            .store
            .transaction(transaction_id)
            .await
            .map_err(LedgerError::at("loading transaction"))?;

        if !original.status.is_pending() {
            return Err(LedgerError::invalid_transition(
                "rolling back transaction",
                original.id,
                original.status,
                TransactionStatus::RolledBack,
            ));
        }

        if original.tx_type != TransactionType::Transfer {
            return Err(LedgerError::WrongType {
                tx: original.id,
                expected: TransactionType::Transfer,
                actual: original.tx_type,
            });
        }

        let reversal = self
            .submit(NewTransaction::transfer(
                original.destination()?,
                original.source()?,
                original.amount,
            ))
            .await?;

        info!(
            tx_id = original.id,
            reversal_id = reversal.id,
            amount = %original.amount,
            "Rolling back transfer"
        );

        self.execute(reversal, &self.cancel, Some(original.id)).await
    }

    /// Validate a draft and store it as a pending transaction
    ///
    /// No money moves until the returned transaction is settled.
    pub async fn submit(&self, draft: NewTransaction) -> Result<Transaction, LedgerError> {
        validate(&draft)?;

        let transaction = self
            .store
            .create_transaction(draft)
            .await
            .map_err(LedgerError::at("creating transaction"))?;

        debug!(
            tx_id = transaction.id,
            tx_type = %transaction.tx_type,
            amount = %transaction.amount,
            "Transaction created"
        );

        Ok(transaction)
    }

    /// Apply a pending transaction and mark it completed
    ///
    /// The stored record is authoritative: a transaction that was rolled back
    /// or settled since `transaction` was read is rejected.
    pub async fn settle(&self, transaction: Transaction) -> Result<Transaction, LedgerError> {
        self.settle_with(transaction, &self.cancel).await
    }

    /// [`settle`](Self::settle), additionally observing `cancel`
    pub async fn settle_with(
        &self,
        transaction: Transaction,
        cancel: &CancellationToken,
    ) -> Result<Transaction, LedgerError> {
        let current = self
            .store
            .transaction(transaction.id)
            .await
            .map_err(LedgerError::at("loading transaction"))?;
        self.execute(current, cancel, None).await
    }

    async fn execute(
        &self,
        transaction: Transaction,
        cancel: &CancellationToken,
        reverses: Option<TransactionId>,
    ) -> Result<Transaction, LedgerError> {
        if !transaction.status.is_pending() {
            return Err(LedgerError::invalid_transition(
                "settling transaction",
                transaction.id,
                transaction.status,
                TransactionStatus::Completed,
            ));
        }

        let legs = match self.load_legs(&transaction).await {
            Ok(legs) => legs,
            Err(e) => return Err(self.fail(&transaction, e).await),
        };

        // Held until the staged values are published or dropped
        let _updates = lock_accounts(&legs).await;

        // Last point where stopping is free: nothing has moved yet
        if cancel.is_cancelled() || self.cancel.is_cancelled() {
            let cancelled = LedgerError::Cancelled {
                step: "settling transaction",
            };
            return Err(self.fail(&transaction, cancelled).await);
        }

        let staged = match legs.iter().map(Leg::stage).collect::<Result<Vec<_>, _>>() {
            Ok(staged) => staged,
            Err(e) => return Err(self.fail(&transaction, e).await),
        };

        let mut progress = Progress::default();
        match self
            .commit(&transaction, &staged, reverses, &mut progress)
            .await
        {
            Ok(completed) => {
                for leg in &staged {
                    leg.balance.publish(&leg.after);
                }
                info!(
                    tx_id = completed.id,
                    tx_type = %completed.tx_type,
                    amount = %completed.amount,
                    "Transaction completed"
                );
                Ok(completed)
            }
            Err(e) => {
                let e = match self.compensate(&transaction, &staged, &progress).await {
                    Ok(()) => e,
                    Err(compensation) => compensation,
                };
                Err(self.fail(&transaction, e).await)
            }
        }
    }

    /// Resolve the balances a transaction touches, debits first
    async fn load_legs(&self, transaction: &Transaction) -> Result<Vec<Leg>, LedgerError> {
        let mut legs = Vec::with_capacity(2);

        if transaction.tx_type.has_source() {
            let balance = self
                .store
                .balance(transaction.source()?)
                .await
                .map_err(LedgerError::at("loading source balance"))?;
            legs.push(Leg {
                balance,
                direction: Direction::Debit,
                amount: transaction.amount,
            });
        }

        if transaction.tx_type.has_destination() {
            let to = transaction.destination()?;
            let balance = match transaction.tx_type {
                TransactionType::Deposit => self.store.open_balance(to).await,
                _ => self.store.balance(to).await,
            }
            .map_err(LedgerError::at("loading destination balance"))?;
            legs.push(Leg {
                balance,
                direction: Direction::Credit,
                amount: transaction.amount,
            });
        }

        Ok(legs)
    }

    /// Write staged balances, their history and the final status
    ///
    /// A rollback's reversal completes in the same status write that marks
    /// the original `rolled_back`, so either both change or neither does.
    async fn commit(
        &self,
        transaction: &Transaction,
        staged: &[Staged],
        reverses: Option<TransactionId>,
        progress: &mut Progress,
    ) -> Result<Transaction, LedgerError> {
        let snapshots: Vec<BalanceSnapshot> = staged.iter().map(|leg| leg.after).collect();

        let saved = match snapshots.as_slice() {
            [single] => self.store.save_balance(single).await,
            all => self.store.save_balances(all).await,
        };
        saved.map_err(LedgerError::at("saving balances"))?;
        progress.balances_saved = true;

        for leg in staged {
            let entry = BalanceHistory::new(leg.after.user_id, leg.after.amount, transaction.id);
            self.store
                .create_history(entry)
                .await
                .map_err(LedgerError::at("recording balance history"))?;
            progress.history_written += 1;
        }

        let Some(original) = reverses else {
            return self
                .store
                .update_transaction_status(transaction.id, TransactionStatus::Completed, None)
                .await
                .map_err(LedgerError::at("completing transaction"));
        };

        let changes = [
            StatusChange::new(original, TransactionStatus::RolledBack),
            StatusChange::new(transaction.id, TransactionStatus::Completed),
        ];
        let mut updated = self
            .store
            .update_transaction_statuses(&changes)
            .await
            .map_err(LedgerError::at("completing rollback"))?;

        updated
            .pop()
            .filter(|completed| completed.id == transaction.id)
            .ok_or_else(|| {
                LedgerError::not_found("completing rollback", Entity::Transaction(transaction.id))
            })
    }

    /// Restore the persisted balances a failed commit overwrote
    ///
    /// Live balances were never published, so only storage needs undoing.
    /// Every restoring history record is attempted even if one fails.
    async fn compensate(
        &self,
        transaction: &Transaction,
        staged: &[Staged],
        progress: &Progress,
    ) -> Result<(), LedgerError> {
        if !progress.balances_saved {
            return Ok(());
        }

        warn!(tx_id = transaction.id, "Compensating partially committed transaction");

        let restored: Vec<BalanceSnapshot> =
            staged.iter().map(|leg| leg.before.touched()).collect();
        self.store
            .save_balances(&restored)
            .await
            .map_err(|e| compensation_failed(transaction.id, e))?;

        for (leg, snapshot) in staged.iter().zip(&restored) {
            leg.balance.publish(snapshot);
        }

        let mut failures = Vec::new();
        for snapshot in restored.iter().take(progress.history_written) {
            let entry = BalanceHistory::new(snapshot.user_id, snapshot.amount, transaction.id);
            if let Err(e) = self.store.create_history(entry).await {
                failures.push(format!("user {}: {}", snapshot.user_id, e));
            }
        }
        if !failures.is_empty() {
            warn!(
                tx_id = transaction.id,
                failures = %failures.join("; "),
                "Failed to record compensating balance history"
            );
        }

        Ok(())
    }

    /// Mark a transaction failed with the error as its reason
    ///
    /// Returns the error so callers can `return Err(self.fail(..).await)`.
    async fn fail(&self, transaction: &Transaction, error: LedgerError) -> LedgerError {
        warn!(
            tx_id = transaction.id,
            tx_type = %transaction.tx_type,
            error = %error,
            "Transaction failed"
        );

        if let Err(e) = self
            .store
            .update_transaction_status(
                transaction.id,
                TransactionStatus::Failed,
                Some(error.to_string()),
            )
            .await
        {
            error!(tx_id = transaction.id, error = %e, "Failed to mark transaction as failed");
        }

        error
    }
}

fn validate(draft: &NewTransaction) -> Result<(), LedgerError> {
    if draft.amount <= Decimal::ZERO {
        return Err(LedgerError::invalid_amount(draft.amount));
    }

    let from = match draft.tx_type.has_source() {
        true => Some(
            draft
                .from_user_id
                .ok_or_else(|| LedgerError::missing_party(draft.tx_type, "source"))?,
        ),
        false => None,
    };
    let to = match draft.tx_type.has_destination() {
        true => Some(
            draft
                .to_user_id
                .ok_or_else(|| LedgerError::missing_party(draft.tx_type, "destination"))?,
        ),
        false => None,
    };

    if let (Some(from), Some(to)) = (from, to) {
        if from == to {
            return Err(LedgerError::SelfTransfer { user_id: from });
        }
    }

    Ok(())
}

/// Take the update locks of every account in `legs`, in user id order
async fn lock_accounts(legs: &[Leg]) -> Vec<tokio::sync::MutexGuard<'_, ()>> {
    let mut balances: Vec<&Balance> = legs.iter().map(|leg| leg.balance.as_ref()).collect();
    balances.sort_by_key(|balance| balance.user_id());
    balances.dedup_by_key(|balance| balance.user_id());

    let mut guards = Vec::with_capacity(balances.len());
    for balance in balances {
        guards.push(balance.lock_updates().await);
    }
    guards
}

fn compensation_failed(tx: TransactionId, cause: impl std::fmt::Display) -> LedgerError {
    error!(tx_id = tx, error = %cause, "Compensation failed, ledger needs manual attention");
    LedgerError::CompensationFailed {
        tx,
        message: cause.to_string(),
    }
}
