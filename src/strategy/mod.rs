//! Processing strategy module
//!
//! A strategy is a complete pipeline: read requests from a CSV file, run them
//! through the ledger, write the final balances. The implementation
//! (sequential or worker pool) is selected at runtime.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::cli::StrategyType;
use crate::core::{LedgerStore, PoolConfig, TransactionService};
use crate::io::RequestRef;
use crate::types::{Transaction, TransactionId};

pub mod pool;
pub mod sequential;

pub use pool::PoolStrategy;
pub use sequential::SequentialStrategy;

/// Processing strategy trait for complete pipelines
pub trait ProcessingStrategy: Send + Sync {
    /// Process requests from `input_path` and write balances to `output`
    ///
    /// Returns `Err` only for fatal problems: the input cannot be opened, the
    /// runtime cannot start, or the output cannot be written. Rejected
    /// requests are logged and processing continues with the next one.
    fn process(&self, input_path: &Path, output: &mut dyn Write) -> Result<(), String>;
}

/// Create a processing strategy based on the specified strategy type
///
/// `config` and `timeout` only apply to the pool strategy.
pub fn create_strategy(
    strategy_type: StrategyType,
    config: Option<PoolConfig>,
    timeout: Option<Duration>,
) -> Box<dyn ProcessingStrategy> {
    match strategy_type {
        StrategyType::Sequential => Box::new(SequentialStrategy),
        StrategyType::Pool => Box::new(PoolStrategy::new(config.unwrap_or_default(), timeout)),
    }
}

/// Maps row labels from the input to the transaction ids storage assigned
#[derive(Debug, Default)]
pub(crate) struct References {
    ids: HashMap<RequestRef, TransactionId>,
}

impl References {
    pub(crate) fn record(&mut self, reference: Option<RequestRef>, transaction: &Transaction) {
        if let Some(reference) = reference {
            if self.ids.insert(reference, transaction.id).is_some() {
                warn!(reference, tx_id = transaction.id, "Row label reused, later row wins");
            }
        }
    }

    pub(crate) fn resolve(&self, reference: RequestRef) -> Option<TransactionId> {
        self.ids.get(&reference).copied()
    }
}

/// Roll back the transfer labelled `target`, logging the outcome
pub(crate) async fn apply_rollback<S: LedgerStore>(
    service: &TransactionService<S>,
    references: &References,
    target: RequestRef,
) {
    let Some(id) = references.resolve(target) else {
        warn!(reference = target, "Rollback of unknown transaction");
        return;
    };

    if let Err(e) = service.rollback(id).await {
        warn!(reference = target, tx_id = id, error = %e, "Rollback rejected");
    }
}
