//! CSV format handling for ledger requests and balance output
//!
//! This module centralizes all CSV format concerns, providing:
//! - CsvRecord structure for deserialization
//! - Conversion from CSV records to ledger requests
//! - Balance output serialization
//!
//! All functions are pure (no I/O) for easy testing.
//!
//! # Input
//!
//! ```text
//! type,from,to,amount,tx
//! deposit,,1,100.0,1
//! withdrawal,1,,25.0,2
//! transfer,1,2,10.0,3
//! payment,2,1,1.5,4
//! rollback,,,,3
//! ```
//!
//! `tx` labels a row so that a later `rollback` row can refer to it. It is
//! optional on every other row.

use std::io::Write;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::{BalanceSnapshot, NewTransaction, UserId};

/// Caller-chosen label of an input row
pub type RequestRef = u64;

/// CSV record structure for deserialization
///
/// Matches the input CSV format with columns: type, from, to, amount, tx.
/// Which columns must be filled depends on the type.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CsvRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub from: Option<UserId>,
    pub to: Option<UserId>,
    pub amount: Option<String>,
    pub tx: Option<RequestRef>,
}

/// One request read from the input
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerRequest {
    /// A money movement (deposit, withdrawal, transfer or payment)
    Move {
        reference: Option<RequestRef>,
        draft: NewTransaction,
    },
    /// Reverse the pending transfer labelled `target`
    Rollback { target: RequestRef },
}

/// Convert a CsvRecord to a LedgerRequest
///
/// Checks that the columns the type needs are present and that the amount
/// parses. Amount sign and self-transfers are left to the ledger so that
/// they are recorded as failed transactions.
pub fn convert_csv_record(csv_record: CsvRecord) -> Result<LedgerRequest, String> {
    let kind = csv_record.kind.to_lowercase();

    if kind == "rollback" {
        let target = csv_record
            .tx
            .ok_or_else(|| "rollback requires the tx of the transfer to reverse".to_string())?;
        return Ok(LedgerRequest::Rollback { target });
    }

    let amount = match csv_record.amount {
        Some(amount_str) if !amount_str.trim().is_empty() => {
            Decimal::from_str(amount_str.trim())
                .map_err(|_| format!("Invalid amount '{}'", amount_str))?
        }
        _ => return Err(format!("{} requires an amount", kind)),
    };

    let from = |label: &str| {
        csv_record
            .from
            .ok_or_else(|| format!("{} requires a 'from' account", label))
    };
    let to = |label: &str| {
        csv_record
            .to
            .ok_or_else(|| format!("{} requires a 'to' account", label))
    };

    let draft = match kind.as_str() {
        "deposit" => NewTransaction::deposit(to("deposit")?, amount),
        "withdrawal" => NewTransaction::withdrawal(from("withdrawal")?, amount),
        "transfer" => NewTransaction::transfer(from("transfer")?, to("transfer")?, amount),
        "payment" => NewTransaction::payment(from("payment")?, to("payment")?, amount),
        _ => return Err(format!("Invalid request type: '{}'", csv_record.kind)),
    };

    Ok(LedgerRequest::Move {
        reference: csv_record.tx,
        draft,
    })
}

/// Write balances to CSV format
///
/// Writes balances with columns: user, balance. Rows are sorted by user id
/// for deterministic output.
pub fn write_balances_csv(
    balances: &[BalanceSnapshot],
    output: &mut dyn Write,
) -> Result<(), String> {
    use csv::Writer;

    let mut writer = Writer::from_writer(output);

    writer
        .write_record(["user", "balance"])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    let mut sorted = balances.to_vec();
    sorted.sort_by_key(|balance| balance.user_id);

    for balance in sorted {
        writer
            .write_record(&[balance.user_id.to_string(), format!("{:.4}", balance.amount)])
            .map_err(|e| format!("Failed to write balance record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))?;

    Ok(())
}
