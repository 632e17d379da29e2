//! Append-only balance audit records

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::transaction::{TransactionId, UserId};

/// Balance of one account right after a transaction touched it
///
/// Records are created once and never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceHistory {
    pub user_id: UserId,
    pub balance_after: Decimal,
    pub triggering_transaction: TransactionId,
    pub created_at: DateTime<Utc>,
}

impl BalanceHistory {
    pub fn new(user_id: UserId, balance_after: Decimal, triggering_transaction: TransactionId) -> Self {
        Self {
            user_id,
            balance_after,
            triggering_transaction,
            created_at: Utc::now(),
        }
    }
}
