//! Domain error types.

use common::TransactionId;
use payment_store::StoreError;
use thiserror::Error;

use crate::scheduler::SchedulerError;
use crate::transaction::TransactionError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The transaction rejected the operation.
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Transaction not found.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// The scheduler refused a task.
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Returns true if a concurrent writer advanced the row first.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::Store(err) if err.is_conflict())
    }

    /// Returns true if the error is an expected business rejection rather
    /// than a system fault.
    pub fn is_validation(&self) -> bool {
        matches!(self, DomainError::Transaction(_))
    }
}
