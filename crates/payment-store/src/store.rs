use async_trait::async_trait;

use crate::{MessageId, OutboxMessage, Result, TransactionId, TransactionRecord, Version};

/// Persistence capability for transaction rows.
///
/// Every write takes the outbox messages produced by the same state change
/// and commits them atomically with the row: either both land or neither
/// does. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Inserts a new transaction row together with its outbox messages.
    ///
    /// Fails with `DuplicateIdempotencyKey` if another row already holds the
    /// record's idempotency key; nothing is written in that case.
    ///
    /// Returns the version assigned to the new row.
    async fn insert_transaction(
        &self,
        record: TransactionRecord,
        outbox: Vec<OutboxMessage>,
    ) -> Result<Version>;

    /// Replaces a transaction row and appends its outbox messages.
    ///
    /// Fails with `ConcurrencyConflict` if the stored version is not
    /// `expected_version`. Returns the new version of the row.
    async fn update_transaction(
        &self,
        record: TransactionRecord,
        expected_version: Version,
        outbox: Vec<OutboxMessage>,
    ) -> Result<Version>;

    /// Retrieves a transaction row by ID.
    async fn get_transaction(&self, id: TransactionId) -> Result<Option<TransactionRecord>>;

    /// Retrieves a transaction row by its idempotency key.
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<TransactionRecord>>;

    /// Retrieves up to `limit` rows in the given status, least recently
    /// updated first.
    async fn find_by_status(&self, status: &str, limit: usize) -> Result<Vec<TransactionRecord>>;
}

/// Persistence capability for outbox messages.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Fetches up to `limit` undelivered messages that have fewer than
    /// `max_attempts` failed deliveries, oldest first.
    async fn fetch_pending_messages(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxMessage>>;

    /// Counts undelivered messages still eligible for delivery.
    async fn count_pending_messages(&self, max_attempts: u32) -> Result<u64>;

    /// Persists the delivery state of the given messages in one write.
    ///
    /// A message already marked processed in the store is left untouched,
    /// and the stored attempt count never goes down. Overlapping relay runs
    /// therefore cannot return a delivered message to the pending set.
    async fn save_messages(&self, messages: Vec<OutboxMessage>) -> Result<()>;

    /// Retrieves a single message by ID, whatever its delivery state.
    async fn get_message(&self, id: MessageId) -> Result<Option<OutboxMessage>>;

    /// Retrieves every message produced by a transaction, oldest first.
    async fn messages_for_transaction(&self, id: TransactionId) -> Result<Vec<OutboxMessage>>;
}

/// Validates outbox messages before they are written with a transaction row.
pub fn validate_outbox_for_write(
    record: &TransactionRecord,
    outbox: &[OutboxMessage],
) -> std::result::Result<(), String> {
    if record.idempotency_key.is_empty() {
        return Err("Transaction record has an empty idempotency key".to_string());
    }

    for message in outbox {
        if message.aggregate_id != record.id {
            return Err(format!(
                "Outbox message {} belongs to transaction {}, not {}",
                message.id, message.aggregate_id, record.id
            ));
        }
        if message.is_processed() {
            return Err(format!(
                "Outbox message {} is already processed",
                message.id
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record() -> TransactionRecord {
        TransactionRecord::new(
            TransactionId::new(),
            "key-1",
            "Pending",
            Utc::now(),
            serde_json::json!({}),
        )
    }

    #[test]
    fn accepts_messages_for_the_same_transaction() {
        let record = record();
        let outbox = vec![OutboxMessage::new(
            record.id,
            "TransactionCreated",
            serde_json::json!({}),
        )];
        assert!(validate_outbox_for_write(&record, &outbox).is_ok());
    }

    #[test]
    fn rejects_messages_for_another_transaction() {
        let record = record();
        let outbox = vec![OutboxMessage::new(
            TransactionId::new(),
            "TransactionCreated",
            serde_json::json!({}),
        )];
        assert!(validate_outbox_for_write(&record, &outbox).is_err());
    }

    #[test]
    fn rejects_empty_idempotency_key() {
        let mut record = record();
        record.idempotency_key.clear();
        assert!(validate_outbox_for_write(&record, &[]).is_err());
    }
}
