//! Outbox error types.

use thiserror::Error;

/// Errors that abort an outbox delivery run.
///
/// Failures to publish individual messages do not abort a run; they are
/// recorded on the message instead.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(#[from] payment_store::StoreError),
}

/// Errors returned by an event publisher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    /// The downstream broker could not be reached.
    #[error("Publisher unavailable: {0}")]
    Unavailable(String),

    /// The downstream broker refused the event.
    #[error("Event rejected: {0}")]
    Rejected(String),
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
