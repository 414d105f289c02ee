//! Payment transaction aggregate and related types.

mod aggregate;
mod backoff;
mod commands;
mod events;
mod number;
mod service;
mod state;

pub use aggregate::Transaction;
pub use backoff::{MAX_ATTEMPTS, MAX_BACKOFF, backoff_delay};
pub use commands::CreateTransaction;
pub use events::{
    EventDecodeError, TransactionCancelledData, TransactionCompletedData, TransactionCreatedData,
    TransactionEvent, TransactionFailedData, TransactionRefundedData,
};
pub use number::{DerivedTransactionNumber, TransactionNumberGenerator};
pub use service::TransactionService;
pub use state::{TransactionStatus, UnknownStatus};

use thiserror::Error;

use crate::money::MoneyError;

/// Errors that can occur during transaction operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionError {
    /// Transaction is not in a status that allows the action.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: TransactionStatus,
        action: &'static str,
    },

    /// Invalid amount.
    #[error("Invalid amount: {minor_units} (must be greater than 0)")]
    InvalidAmount { minor_units: i64 },

    /// Amount or currency could not be constructed.
    #[error(transparent)]
    Money(#[from] MoneyError),

    /// A required field is empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}
