//! Transaction-related types for the ledger
//!
//! A transaction is created `pending`, assigned an id by storage, and then
//! moved exactly once into one of the terminal states.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::LedgerError;

/// Account identifier
pub type UserId = i64;

/// Transaction identifier, assigned by storage
pub type TransactionId = i64;

/// Kinds of money movement recorded by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Credit funds to `to_user_id`
    Deposit,
    /// Debit funds from `from_user_id`
    Withdrawal,
    /// Move funds from `from_user_id` to `to_user_id`
    Transfer,
    /// Same money movement as a transfer, recorded separately for reporting
    Payment,
}

impl TransactionType {
    /// Whether this type debits a source account
    pub fn has_source(self) -> bool {
        !matches!(self, TransactionType::Deposit)
    }

    /// Whether this type credits a destination account
    pub fn has_destination(self) -> bool {
        !matches!(self, TransactionType::Withdrawal)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Transfer => "transfer",
            TransactionType::Payment => "payment",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a transaction
///
/// `Pending` is the only state with outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    RolledBack,
}

impl TransactionStatus {
    pub fn is_pending(self) -> bool {
        matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// A transaction that has not been assigned an id yet
///
/// Storage turns this into a [`Transaction`] in `pending` state.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub from_user_id: Option<UserId>,
    pub to_user_id: Option<UserId>,
    pub amount: Decimal,
    pub tx_type: TransactionType,
}

impl NewTransaction {
    pub fn deposit(user_id: UserId, amount: Decimal) -> Self {
        Self {
            from_user_id: None,
            to_user_id: Some(user_id),
            amount,
            tx_type: TransactionType::Deposit,
        }
    }

    pub fn withdrawal(user_id: UserId, amount: Decimal) -> Self {
        Self {
            from_user_id: Some(user_id),
            to_user_id: None,
            amount,
            tx_type: TransactionType::Withdrawal,
        }
    }

    pub fn transfer(from_user_id: UserId, to_user_id: UserId, amount: Decimal) -> Self {
        Self {
            from_user_id: Some(from_user_id),
            to_user_id: Some(to_user_id),
            amount,
            tx_type: TransactionType::Transfer,
        }
    }

    pub fn payment(from_user_id: UserId, to_user_id: UserId, amount: Decimal) -> Self {
        Self {
            tx_type: TransactionType::Payment,
            ..Self::transfer(from_user_id, to_user_id, amount)
        }
    }
}

/// A recorded money movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<UserId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_user_id: Option<UserId>,

    /// Always greater than zero
    pub amount: Decimal,

    #[serde(rename = "type")]
    pub tx_type: TransactionType,

    pub status: TransactionStatus,

    /// Why the transaction ended up `failed`, if it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Build a pending transaction from a draft and a storage-assigned id
    pub fn pending(id: TransactionId, draft: NewTransaction) -> Self {
        let now = Utc::now();
        Self {
            id,
            from_user_id: draft.from_user_id,
            to_user_id: draft.to_user_id,
            amount: draft.amount,
            tx_type: draft.tx_type,
            status: TransactionStatus::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// pending -> completed
    pub fn complete(&mut self) -> Result<(), LedgerError> {
        self.transition(TransactionStatus::Completed, None)
    }

    /// pending -> failed, keeping the reason for the audit trail
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), LedgerError> {
        self.transition(TransactionStatus::Failed, Some(reason.into()))
    }

    /// pending -> rolled_back
    pub fn roll_back(&mut self) -> Result<(), LedgerError> {
        self.transition(TransactionStatus::RolledBack, None)
    }

    /// Move out of `pending` into `status`
    ///
    /// Fails with `InvalidStateTransition` when the transaction is not pending,
    /// or when asked to move to `pending` itself. The record is left untouched
    /// on failure.
    pub fn transition(
        &mut self,
        status: TransactionStatus,
        reason: Option<String>,
    ) -> Result<(), LedgerError> {
        if !self.status.is_pending() || status.is_pending() {
            return Err(LedgerError::invalid_transition(
                "changing status",
                self.id,
                self.status,
                status,
            ));
        }

        self.status = status;
        self.failure_reason = match status {
            TransactionStatus::Failed => reason,
            _ => None,
        };
        self.updated_at = Utc::now();

        Ok(())
    }

    /// Source account, required for every type except deposits
    pub fn source(&self) -> Result<UserId, LedgerError> {
        self.from_user_id
            .ok_or_else(|| LedgerError::missing_party(self.tx_type, "source"))
    }

    /// Destination account, required for every type except withdrawals
    pub fn destination(&self) -> Result<UserId, LedgerError> {
        self.to_user_id
            .ok_or_else(|| LedgerError::missing_party(self.tx_type, "destination"))
    }
}
