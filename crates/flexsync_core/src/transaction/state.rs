//! Write transaction lifecycle.

use crate::error::{CoreError, CoreResult};

/// Where a [`WriteTransaction`](crate::WriteTransaction) is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Open for reads and writes.
    Active,
    /// Changes are durable and visible to new snapshots.
    Committed,
    /// Changes were discarded.
    RolledBack,
}

impl TransactionState {
    pub(crate) fn ensure_active(self) -> CoreResult<()> {
        match self {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => {
                Err(CoreError::invalid_operation("write transaction was committed"))
            }
            TransactionState::RolledBack => {
                Err(CoreError::invalid_operation("write transaction was rolled back"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_transactions_refuse_work() {
        assert!(TransactionState::Active.ensure_active().is_ok());
        assert!(TransactionState::Committed.ensure_active().is_err());
        assert!(TransactionState::RolledBack.ensure_active().is_err());
    }
}
