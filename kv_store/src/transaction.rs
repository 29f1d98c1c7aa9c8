//! Transaction bookkeeping for journaled stores

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identifier for a transaction within one journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// Errors that can occur during transactions
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionError {
    /// A transaction is already open; they do not nest
    #[error("transaction {0} is already active")]
    AlreadyActive(TransactionId),

    /// Commit or rollback without a matching begin
    #[error("no active transaction")]
    NotActive,
}

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active
    Active,
    /// Transaction has been committed
    Committed,
    /// Transaction has been rolled back
    RolledBack,
}

/// An open or finished transaction
#[derive(Debug, Clone)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    writes: usize,
}

impl Transaction {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            writes: 0,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Number of writes recorded so far
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub(crate) fn record_write(&mut self) {
        self.writes += 1;
    }

    pub(crate) fn commit(&mut self) -> Result<(), TransactionError> {
        if self.state != TransactionState::Active {
            return Err(TransactionError::NotActive);
        }
        self.state = TransactionState::Committed;
        Ok(())
    }

    pub(crate) fn rollback(&mut self) -> Result<(), TransactionError> {
        if self.state != TransactionState::Active {
            return Err(TransactionError::NotActive);
        }
        self.state = TransactionState::RolledBack;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_creation() {
        let tx = Transaction::new(TransactionId::new(1));
        assert_eq!(tx.state(), TransactionState::Active);
        assert_eq!(tx.writes(), 0);
        assert_eq!(tx.id().to_string(), "tx1");
    }

    #[test]
    fn test_transaction_commit() {
        let mut tx = Transaction::new(TransactionId::new(1));
        tx.record_write();
        tx.commit().unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);
        assert_eq!(tx.writes(), 1);
    }

    #[test]
    fn test_transaction_double_commit() {
        let mut tx = Transaction::new(TransactionId::new(1));
        tx.commit().unwrap();
        assert_eq!(tx.commit(), Err(TransactionError::NotActive));
    }

    #[test]
    fn test_rollback_after_commit() {
        let mut tx = Transaction::new(TransactionId::new(1));
        tx.commit().unwrap();
        assert_eq!(tx.rollback(), Err(TransactionError::NotActive));
    }
}
