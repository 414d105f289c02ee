//! Processing error types.

use common::TransactionId;
use domain::{DomainError, SchedulerError};
use thiserror::Error;

use crate::orchestrator::ProcessingOutcome;
use crate::processor::ProcessorError;

/// Errors that can occur while processing transactions.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Domain error (store, illegal transition, missing transaction).
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// A follow-up task could not be scheduled after the state was persisted.
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// The processor call failed without a structured result.
    ///
    /// The attempt has already been recorded as a retryable failure; this
    /// error only reports the fault to the caller.
    #[error("Unexpected processor fault for {transaction_id}: {description}")]
    UnexpectedFault {
        transaction_id: TransactionId,
        description: String,
        outcome: ProcessingOutcome,
    },

    /// The processor refused a refund. The transaction stays RefundPending.
    #[error("Refund failed for {transaction_id}: {source}")]
    RefundFailed {
        transaction_id: TransactionId,
        #[source]
        source: ProcessorError,
    },

    /// Another caller holds the refund call for this transaction.
    #[error("Refund already in progress for {0}")]
    RefundInProgress(TransactionId),

    /// The dead-letter notifier failed.
    #[error("Notifier error: {0}")]
    Notify(#[from] NotifyError),
}

impl ProcessingError {
    /// Returns true if a concurrent writer advanced the transaction first.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ProcessingError::Domain(err) if err.is_conflict())
    }
}

/// Errors returned by a dead-letter notifier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    /// The review channel could not be reached.
    #[error("Notifier unavailable: {0}")]
    Unavailable(String),
}

/// Result type for processing operations.
pub type Result<T> = std::result::Result<T, ProcessingError>;
