use thiserror::Error;

use crate::{TransactionId, Version};

/// Errors that can occur when interacting with the payment store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The row was modified by another writer since it was read.
    #[error(
        "Concurrency conflict for transaction {transaction_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        transaction_id: TransactionId,
        expected: Version,
        actual: Version,
    },

    /// A transaction with the same idempotency key already exists.
    #[error("Duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(String),

    /// The transaction was not found in the store.
    #[error("Transaction not found: {0}")]
    NotFound(TransactionId),

    /// The write was rejected before reaching storage.
    #[error("Invalid write: {0}")]
    InvalidWrite(String),

    /// The store is temporarily unable to serve the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if the error means another writer won the race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
