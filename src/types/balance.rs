//! Per-account balance with its own read/write lock
//!
//! A `Balance` is the only way to change an account's money. Callers never
//! see the amount field directly; they go through `credit`, `debit` and the
//! read accessors, each of which takes the lock once.
//!
//! Multi-step settlements hold the account's update lock
//! ([`Balance::lock_updates`]) from staging to publication. While it is held,
//! the new value exists only as a staged [`BalanceSnapshot`]; other callers
//! keep reading the last published amount.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use super::error::LedgerError;
use super::transaction::UserId;

#[derive(Debug, Clone, Copy)]
struct BalanceState {
    amount: Decimal,
    last_updated_at: DateTime<Utc>,
}

/// Guarded monetary state of one account
///
/// Reads take the lock in shared mode and may run alongside each other;
/// `credit` and `debit` take it exclusively. Balances of different accounts
/// never share a lock.
#[derive(Debug)]
pub struct Balance {
    user_id: UserId,
    state: RwLock<BalanceState>,
    /// Held across the awaits of a settlement; never taken by readers
    updates: AsyncMutex<()>,
}

/// Point-in-time copy of a balance, the form storage persists
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub user_id: UserId,
    pub amount: Decimal,
    pub last_updated_at: DateTime<Utc>,
}

impl BalanceSnapshot {
    /// The snapshot after adding `amount`; `self` is not modified
    pub fn credited(&self, amount: Decimal) -> Result<BalanceSnapshot, LedgerError> {
        let amount = self
            .amount
            .checked_add(amount)
            .ok_or_else(|| LedgerError::arithmetic_overflow("credit", self.user_id))?;

        Ok(BalanceSnapshot {
            user_id: self.user_id,
            amount,
            last_updated_at: Utc::now(),
        })
    }

    /// The snapshot after subtracting `amount`
    ///
    /// `InsufficientFunds` when `amount` exceeds the snapshot's amount.
    pub fn debited(&self, amount: Decimal) -> Result<BalanceSnapshot, LedgerError> {
        if amount > self.amount {
            return Err(LedgerError::insufficient_funds(
                self.user_id,
                self.amount,
                amount,
            ));
        }

        let amount = self
            .amount
            .checked_sub(amount)
            .ok_or_else(|| LedgerError::arithmetic_overflow("debit", self.user_id))?;

        Ok(BalanceSnapshot {
            user_id: self.user_id,
            amount,
            last_updated_at: Utc::now(),
        })
    }

    /// The same amount, stamped now
    pub fn touched(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            last_updated_at: Utc::now(),
            ..*self
        }
    }
}

impl Balance {
    /// Create a balance for `user_id` holding `initial_amount`
    pub fn new(user_id: UserId, initial_amount: Decimal) -> Self {
        Self {
            user_id,
            state: RwLock::new(BalanceState {
                amount: initial_amount,
                last_updated_at: Utc::now(),
            }),
            updates: AsyncMutex::new(()),
        }
    }

    /// Rebuild a balance from a persisted snapshot
    pub fn from_snapshot(snapshot: BalanceSnapshot) -> Self {
        Self {
            user_id: snapshot.user_id,
            state: RwLock::new(BalanceState {
                amount: snapshot.amount,
                last_updated_at: snapshot.last_updated_at,
            }),
            updates: AsyncMutex::new(()),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Add `amount` and return the new balance
    ///
    /// Callers are expected to pass positive amounts; the primitive itself
    /// accepts any sign. The only failure is decimal overflow.
    pub fn credit(&self, amount: Decimal) -> Result<Decimal, LedgerError> {
        let mut state = self.write();

        let next = self.snapshot_of(&state).credited(amount)?;
        Self::store(&mut state, &next);

        Ok(next.amount)
    }

    /// Subtract `amount` and return the new balance
    ///
    /// Rejected with `InsufficientFunds` when `amount` exceeds the current
    /// balance, in which case nothing changes.
    pub fn debit(&self, amount: Decimal) -> Result<Decimal, LedgerError> {
        let mut state = self.write();

        let next = self.snapshot_of(&state).debited(amount)?;
        Self::store(&mut state, &next);

        Ok(next.amount)
    }

    /// Exclusive right to stage and publish a new value for this account
    ///
    /// Settlements take it before reading the value they stage from and keep
    /// it until the staged value is published or dropped.
    pub async fn lock_updates(&self) -> AsyncMutexGuard<'_, ()> {
        self.updates.lock().await
    }

    /// Make a committed snapshot the live value
    ///
    /// Callers hold [`lock_updates`](Self::lock_updates). Snapshots of other
    /// accounts are ignored.
    pub fn publish(&self, snapshot: &BalanceSnapshot) {
        if snapshot.user_id != self.user_id {
            return;
        }
        let mut state = self.write();
        Self::store(&mut state, snapshot);
    }

    /// Current amount
    pub fn amount(&self) -> Decimal {
        self.read().amount
    }

    pub fn last_updated_at(&self) -> DateTime<Utc> {
        self.read().last_updated_at
    }

    /// Amount and timestamp read under a single lock acquisition
    pub fn snapshot(&self) -> BalanceSnapshot {
        self.snapshot_of(&self.read())
    }

    fn snapshot_of(&self, state: &BalanceState) -> BalanceSnapshot {
        BalanceSnapshot {
            user_id: self.user_id,
            amount: state.amount,
            last_updated_at: state.last_updated_at,
        }
    }

    fn store(state: &mut BalanceState, snapshot: &BalanceSnapshot) {
        state.amount = snapshot.amount;
        state.last_updated_at = snapshot.last_updated_at;
    }

    // A panic while holding the lock cannot leave the state half-written:
    // every mutation assigns fully computed values.
    fn read(&self) -> RwLockReadGuard<'_, BalanceState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BalanceState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
