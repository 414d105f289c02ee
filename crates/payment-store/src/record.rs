use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MessageId, TransactionId};

/// Row version used for optimistic concurrency control.
///
/// A transaction row is written at version 1 and every successful update
/// bumps the version by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the version of a row that has not been written yet.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the version assigned on insert.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A persisted transaction row.
///
/// `state` holds the full serialized aggregate. `idempotency_key` and
/// `status` are duplicated out of it so the store can enforce uniqueness
/// and answer status queries without decoding the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// The transaction this row belongs to.
    pub id: TransactionId,

    /// Client-supplied idempotency key, unique across the store.
    pub idempotency_key: String,

    /// Lifecycle status name (e.g. "Pending", "Processing").
    pub status: String,

    /// Row version for optimistic concurrency.
    pub version: Version,

    /// When the row was first written.
    pub created_at: DateTime<Utc>,

    /// When the row was last written.
    pub updated_at: DateTime<Utc>,

    /// Serialized aggregate state.
    pub state: serde_json::Value,
}

impl TransactionRecord {
    /// Creates a record for a transaction that has not been persisted yet.
    pub fn new(
        id: TransactionId,
        idempotency_key: impl Into<String>,
        status: impl Into<String>,
        created_at: DateTime<Utc>,
        state: serde_json::Value,
    ) -> Self {
        Self {
            id,
            idempotency_key: idempotency_key.into(),
            status: status.into(),
            version: Version::initial(),
            created_at,
            updated_at: created_at,
            state,
        }
    }
}

/// A domain event waiting to be delivered to downstream consumers.
///
/// A message is pending while `processed_at` is `None`. Once processed it is
/// never delivered again; once `delivery_attempts` reaches the relay's cap it
/// is skipped by future batches but stays in the store as a visible failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Unique message identifier.
    pub id: MessageId,

    /// The transaction whose write produced this message.
    pub aggregate_id: TransactionId,

    /// Event type discriminator (e.g. "TransactionCreated").
    pub event_type: String,

    /// Serialized event payload.
    pub payload: serde_json::Value,

    /// When the message was recorded.
    pub created_at: DateTime<Utc>,

    /// When the message was successfully delivered.
    pub processed_at: Option<DateTime<Utc>>,

    /// Number of failed delivery attempts.
    pub delivery_attempts: u32,

    /// Error from the most recent failed attempt.
    pub last_error: Option<String>,
}

impl OutboxMessage {
    /// Creates a new pending message.
    pub fn new(
        aggregate_id: TransactionId,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: MessageId::new(),
            aggregate_id,
            event_type: event_type.into(),
            payload,
            created_at: Utc::now(),
            processed_at: None,
            delivery_attempts: 0,
            last_error: None,
        }
    }

    /// Returns true if the message has been delivered.
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    /// Returns true if the message is still eligible for delivery.
    pub fn is_eligible(&self, max_attempts: u32) -> bool {
        !self.is_processed() && self.delivery_attempts < max_attempts
    }

    /// Marks the message as delivered.
    pub fn mark_as_processed(&mut self) {
        if self.processed_at.is_none() {
            self.processed_at = Some(Utc::now());
        }
    }

    /// Records a failed delivery attempt.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.delivery_attempts += 1;
        self.last_error = Some(error.into());
    }
}
