use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    MessageId, OutboxMessage, Result, StoreError, TransactionId, TransactionRecord, Version,
    store::{OutboxStore, TransactionStore, validate_outbox_for_write},
};

#[derive(Debug, Default)]
struct InMemoryState {
    transactions: HashMap<TransactionId, TransactionRecord>,
    idempotency_keys: HashMap<String, TransactionId>,
    outbox: Vec<OutboxMessage>,
}

/// In-memory store implementation for testing and local runs.
///
/// A single lock guards rows, the idempotency index and the outbox, so each
/// write is atomic in the same way a database commit is.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<InMemoryState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent store operation fail with `Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of transaction rows.
    pub async fn transaction_count(&self) -> usize {
        self.state.read().await.transactions.len()
    }

    /// Returns the number of outbox messages, delivered or not.
    pub async fn message_count(&self) -> usize {
        self.state.read().await.outbox.len()
    }

    /// Returns every outbox message in insertion order.
    pub async fn all_messages(&self) -> Vec<OutboxMessage> {
        self.state.read().await.outbox.clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn insert_transaction(
        &self,
        mut record: TransactionRecord,
        outbox: Vec<OutboxMessage>,
    ) -> Result<Version> {
        self.check_available()?;
        validate_outbox_for_write(&record, &outbox).map_err(StoreError::InvalidWrite)?;

        let mut state = self.state.write().await;

        // Unique constraint simulation
        if state.idempotency_keys.contains_key(&record.idempotency_key) {
            return Err(StoreError::DuplicateIdempotencyKey(record.idempotency_key));
        }
        if state.transactions.contains_key(&record.id) {
            return Err(StoreError::ConcurrencyConflict {
                transaction_id: record.id,
                expected: Version::initial(),
                actual: state.transactions[&record.id].version,
            });
        }

        record.version = Version::first();
        state
            .idempotency_keys
            .insert(record.idempotency_key.clone(), record.id);
        state.transactions.insert(record.id, record);
        state.outbox.extend(outbox);

        Ok(Version::first())
    }

    async fn update_transaction(
        &self,
        mut record: TransactionRecord,
        expected_version: Version,
        outbox: Vec<OutboxMessage>,
    ) -> Result<Version> {
        self.check_available()?;
        validate_outbox_for_write(&record, &outbox).map_err(StoreError::InvalidWrite)?;

        let mut state = self.state.write().await;

        let current = state
            .transactions
            .get(&record.id)
            .ok_or(StoreError::NotFound(record.id))?;

        if current.version != expected_version {
            metrics::counter!("store_concurrency_conflicts_total").increment(1);
            tracing::debug!(
                transaction_id = %record.id,
                expected = %expected_version,
                actual = %current.version,
                "Version conflict on update"
            );
            return Err(StoreError::ConcurrencyConflict {
                transaction_id: record.id,
                expected: expected_version,
                actual: current.version,
            });
        }

        // The key and creation time never change after insert
        record.idempotency_key = current.idempotency_key.clone();
        record.created_at = current.created_at;
        record.version = expected_version.next();
        record.updated_at = Utc::now();

        let new_version = record.version;
        state.transactions.insert(record.id, record);
        state.outbox.extend(outbox);

        Ok(new_version)
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<TransactionRecord>> {
        self.check_available()?;
        Ok(self.state.read().await.transactions.get(&id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<TransactionRecord>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .idempotency_keys
            .get(key)
            .and_then(|id| state.transactions.get(id))
            .cloned())
    }

    async fn find_by_status(&self, status: &str, limit: usize) -> Result<Vec<TransactionRecord>> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut records: Vec<_> = state
            .transactions
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.updated_at);
        records.truncate(limit);
        Ok(records)
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn fetch_pending_messages(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxMessage>> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut messages: Vec<_> = state
            .outbox
            .iter()
            .filter(|m| m.is_eligible(max_attempts))
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps
        messages.sort_by_key(|m| m.created_at);
        messages.truncate(limit);
        Ok(messages)
    }

    async fn count_pending_messages(&self, max_attempts: u32) -> Result<u64> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|m| m.is_eligible(max_attempts))
            .count() as u64)
    }

    async fn save_messages(&self, messages: Vec<OutboxMessage>) -> Result<()> {
        self.check_available()?;

        let mut state = self.state.write().await;
        for message in messages {
            match state.outbox.iter_mut().find(|m| m.id == message.id) {
                Some(stored) if stored.is_processed() => {
                    tracing::debug!(
                        message_id = %message.id,
                        "Outbox message already processed, keeping stored state"
                    );
                }
                Some(stored) => {
                    let attempts = stored.delivery_attempts.max(message.delivery_attempts);
                    *stored = message;
                    stored.delivery_attempts = attempts;
                }
                None => {
                    return Err(StoreError::InvalidWrite(format!(
                        "Outbox message {} does not exist",
                        message.id
                    )));
                }
            }
        }
        Ok(())
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<OutboxMessage>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.outbox.iter().find(|m| m.id == id).cloned())
    }

    async fn messages_for_transaction(&self, id: TransactionId) -> Result<Vec<OutboxMessage>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|m| m.aggregate_id == id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_record(key: &str) -> TransactionRecord {
        TransactionRecord::new(
            TransactionId::new(),
            key,
            "Pending",
            Utc::now(),
            serde_json::json!({"status": "Pending"}),
        )
    }

    fn created_message(record: &TransactionRecord) -> OutboxMessage {
        OutboxMessage::new(record.id, "TransactionCreated", serde_json::json!({}))
    }

    #[tokio::test]
    async fn insert_and_retrieve() {
        let store = InMemoryStore::new();
        let record = create_record("K1");
        let id = record.id;
        let message = created_message(&record);

        let version = store.insert_transaction(record, vec![message]).await.unwrap();
        assert_eq!(version, Version::first());

        let loaded = store.get_transaction(id).await.unwrap().unwrap();
        assert_eq!(loaded.idempotency_key, "K1");
        assert_eq!(loaded.version, Version::first());

        let by_key = store.find_by_idempotency_key("K1").await.unwrap().unwrap();
        assert_eq!(by_key.id, id);
        assert_eq!(store.message_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_key_writes_nothing() {
        let store = InMemoryStore::new();
        let first = create_record("K1");
        let message = created_message(&first);
        store.insert_transaction(first, vec![message]).await.unwrap();

        let second = create_record("K1");
        let message = created_message(&second);
        let result = store.insert_transaction(second, vec![message]).await;

        assert!(matches!(result, Err(StoreError::DuplicateIdempotencyKey(_))));
        assert_eq!(store.transaction_count().await, 1);
        assert_eq!(store.message_count().await, 1);
    }

    #[tokio::test]
    async fn update_with_stale_version_conflicts() {
        let store = InMemoryStore::new();
        let record = create_record("K1");
        store
            .insert_transaction(record.clone(), vec![])
            .await
            .unwrap();

        let v2 = store
            .update_transaction(record.clone(), Version::first(), vec![])
            .await
            .unwrap();
        assert_eq!(v2, Version::new(2));

        let result = store
            .update_transaction(record.clone(), Version::first(), vec![])
            .await;
        assert!(matches!(
            result,
            Err(StoreError::ConcurrencyConflict { .. })
        ));
        assert!(result.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn update_missing_row_fails() {
        let store = InMemoryStore::new();
        let result = store
            .update_transaction(create_record("K1"), Version::first(), vec![])
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn unavailable_store_rejects_writes() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);

        let record = create_record("K1");
        let message = created_message(&record);
        let result = store.insert_transaction(record, vec![message]).await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(store.transaction_count().await, 0);
        assert_eq!(store.message_count().await, 0);
        assert!(matches!(
            store.find_by_status("Pending", 10).await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn find_by_status_filters_and_limits() {
        let store = InMemoryStore::new();
        for i in 0..3 {
            store
                .insert_transaction(create_record(&format!("K{i}")), vec![])
                .await
                .unwrap();
        }
        let mut failed = create_record("K-failed");
        failed.status = "Failed".to_string();
        store.insert_transaction(failed, vec![]).await.unwrap();

        assert_eq!(store.find_by_status("Pending", 10).await.unwrap().len(), 3);
        assert_eq!(store.find_by_status("Pending", 2).await.unwrap().len(), 2);
        assert_eq!(store.find_by_status("Failed", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pending_messages_skip_processed_and_exhausted() {
        let store = InMemoryStore::new();
        let record = create_record("K1");
        let outbox: Vec<_> = (0..3).map(|_| created_message(&record)).collect();
        store.insert_transaction(record, outbox).await.unwrap();

        let mut pending = store.fetch_pending_messages(20, 5).await.unwrap();
        assert_eq!(pending.len(), 3);

        pending[0].mark_as_processed();
        for _ in 0..5 {
            pending[1].record_failure("boom");
        }
        let exhausted_id = pending[1].id;
        store.save_messages(pending).await.unwrap();

        let remaining = store.fetch_pending_messages(20, 5).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(store.count_pending_messages(5).await.unwrap(), 1);

        // Exhausted messages remain queryable
        let exhausted = store.get_message(exhausted_id).await.unwrap().unwrap();
        assert_eq!(exhausted.delivery_attempts, 5);
    }

    #[tokio::test]
    async fn stale_failure_does_not_undo_processed_message() {
        let store = InMemoryStore::new();
        let record = create_record("K1");
        store
            .insert_transaction(record.clone(), vec![created_message(&record)])
            .await
            .unwrap();

        // Two relay runs fetch the same message
        let mut delivered = store.fetch_pending_messages(20, 5).await.unwrap();
        let mut failed = delivered.clone();

        delivered[0].mark_as_processed();
        let processed_at = delivered[0].processed_at;
        store.save_messages(delivered).await.unwrap();

        failed[0].record_failure("publisher unavailable");
        store.save_messages(failed.clone()).await.unwrap();

        let stored = store.get_message(failed[0].id).await.unwrap().unwrap();
        assert_eq!(stored.processed_at, processed_at);
        assert_eq!(stored.delivery_attempts, 0);
        assert!(stored.last_error.is_none());
        assert_eq!(store.count_pending_messages(5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fetch_pending_respects_limit_and_order() {
        let store = InMemoryStore::new();
        let record = create_record("K1");
        let outbox: Vec<_> = (0..25).map(|_| created_message(&record)).collect();
        let first_id = outbox[0].id;
        store.insert_transaction(record, outbox).await.unwrap();

        let batch = store.fetch_pending_messages(20, 5).await.unwrap();
        assert_eq!(batch.len(), 20);
        assert_eq!(batch[0].id, first_id);
        assert!(batch.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }
}
