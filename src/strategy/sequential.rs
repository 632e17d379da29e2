//! Sequential processing strategy
//!
//! Runs each request through `TransactionService` in file order, on a
//! single-threaded runtime. Every money movement is settled before the next
//! row is read, so a rollback row can only ever find its target completed
//! (and is rejected). Use the pool strategy to roll back pending transfers.
//!
//! Memory use is O(accounts + transactions); rows are streamed.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::core::{MemoryStore, TransactionService};
use crate::io::{write_balances_csv, LedgerRequest, RequestReader, RequestRef};
use crate::strategy::{apply_rollback, ProcessingStrategy, References};
use crate::types::{LedgerError, NewTransaction, Transaction, TransactionType};

/// Sequential processing strategy
///
/// # Examples
///
/// ```no_run
/// use rust_ledger_engine::strategy::{ProcessingStrategy, SequentialStrategy};
/// use std::path::Path;
/// use std::io;
///
/// let mut output = io::stdout();
/// SequentialStrategy
///     .process(Path::new("requests.csv"), &mut output)
///     .expect("Processing failed");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct SequentialStrategy;

impl ProcessingStrategy for SequentialStrategy {
    fn process(&self, input_path: &Path, output: &mut dyn Write) -> Result<(), String> {
        let reader = RequestReader::new(input_path)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| format!("Failed to create tokio runtime: {}", e))?;

        let store = Arc::new(MemoryStore::new());
        let service = TransactionService::new(Arc::clone(&store));

        runtime.block_on(async {
            let mut references = References::default();
            let mut rows = 0usize;

            for result in reader {
                rows += 1;
                match result {
                    Ok(LedgerRequest::Move { reference, draft }) => {
                        apply_move(&service, &mut references, reference, draft).await
                    }
                    Ok(LedgerRequest::Rollback { target }) => {
                        apply_rollback(&service, &references, target).await
                    }
                    Err(e) => warn!(error = %e, "Skipping malformed request"),
                }
            }

            info!(rows, "Input processed");
        });

        write_balances_csv(&store.balances(), output)
    }
}

async fn apply_move(
    service: &TransactionService<MemoryStore>,
    references: &mut References,
    reference: Option<RequestRef>,
    draft: NewTransaction,
) {
    let tx_type = draft.tx_type;
    let result: Result<Transaction, LedgerError> =
        match (tx_type, draft.from_user_id, draft.to_user_id) {
            (TransactionType::Deposit, _, Some(to)) => service.deposit(to, draft.amount).await,
            (TransactionType::Withdrawal, Some(from), _) => {
                service.withdraw(from, draft.amount).await
            }
            (TransactionType::Transfer, Some(from), Some(to)) => {
                service.transfer(from, to, draft.amount).await
            }
            // Payments have no dedicated operation
            _ => match service.submit(draft).await {
                Ok(pending) => service.settle(pending).await,
                Err(e) => Err(e),
            },
        };

    match result {
        Ok(transaction) => references.record(reference, &transaction),
        Err(e) => warn!(?reference, %tx_type, error = %e, "Request rejected"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("Failed to write to temp file");
        file.flush().expect("Failed to flush temp file");
        file
    }

    fn run(content: &str) -> String {
        let file = create_temp_csv(content);
        let mut output = Vec::new();
        SequentialStrategy
            .process(file.path(), &mut output)
            .unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn test_processes_deposit_and_transfer() {
        let output = run("type,from,to,amount,tx\n\
                          deposit,,1,100.0,1\n\
                          deposit,,2,0.5,2\n\
                          transfer,1,2,25.25,3\n");

        assert_eq!(output, "user,balance\n1,74.7500\n2,25.7500\n");
    }

    #[test]
    fn test_order_matters_for_withdrawals() {
        let output = run("type,from,to,amount,tx\n\
                          deposit,,1,10,1\n\
                          withdrawal,1,,10,2\n\
                          withdrawal,1,,1,3\n");

        assert_eq!(output, "user,balance\n1,0.0000\n");
    }

    #[test]
    fn test_rejected_requests_do_not_stop_processing() {
        let output = run("type,from,to,amount,tx\n\
                          deposit,,1,10,1\n\
                          deposit,,1,-5,2\n\
                          transfer,1,1,5,3\n\
                          transfer,1,9,5,4\n\
                          bogus,1,2,3,5\n\
                          payment,1,2,4,6\n");

        assert_eq!(output, "user,balance\n1,10.0000\n");
    }

    #[test]
    fn test_payment_requires_existing_destination() {
        let output = run("type,from,to,amount,tx\n\
                          deposit,,1,10,1\n\
                          deposit,,2,0,2\n\
                          deposit,,2,1,3\n\
                          payment,1,2,4,4\n");

        assert_eq!(output, "user,balance\n1,6.0000\n2,5.0000\n");
    }

    #[test]
    fn test_rollback_of_completed_transfer_is_rejected() {
        let output = run("type,from,to,amount,tx\n\
                          deposit,,1,10,1\n\
                          deposit,,2,10,2\n\
                          transfer,1,2,5,3\n\
                          rollback,,,,3\n\
                          rollback,,,,99\n");

        assert_eq!(output, "user,balance\n1,5.0000\n2,15.0000\n");
    }

    #[test]
    fn test_missing_file() {
        let mut output = Vec::new();

        let result = SequentialStrategy.process(Path::new("nonexistent.csv"), &mut output);

        assert!(result.unwrap_err().contains("Failed to open file"));
    }

    #[test]
    fn test_strategy_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SequentialStrategy>();
    }
}
