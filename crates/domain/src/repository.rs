//! Loading and persisting transactions.

use common::TransactionId;
use payment_store::{OutboxMessage, TransactionRecord, TransactionStore};

use crate::error::DomainError;
use crate::event::DomainEvent;
use crate::transaction::{Transaction, TransactionError, TransactionEvent, TransactionStatus};

/// Maps [`Transaction`] aggregates onto store rows.
///
/// Every write carries the events the state change produced; they are
/// committed to the outbox atomically with the row. Updates are checked
/// against the version the transaction was loaded at, so a writer holding a
/// stale copy fails with a concurrency conflict instead of overwriting.
#[derive(Clone)]
pub struct TransactionRepository<S: TransactionStore> {
    store: S,
}

impl<S: TransactionStore> TransactionRepository<S> {
    /// Creates a new repository over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads a transaction, returning None if it doesn't exist.
    pub async fn load(&self, id: TransactionId) -> Result<Option<Transaction>, DomainError> {
        self.store
            .get_transaction(id)
            .await?
            .map(Self::from_record)
            .transpose()
    }

    /// Loads a transaction, failing with `TransactionNotFound` if it doesn't exist.
    pub async fn load_existing(&self, id: TransactionId) -> Result<Transaction, DomainError> {
        self.load(id)
            .await?
            .ok_or(DomainError::TransactionNotFound(id))
    }

    /// Finds the transaction holding an idempotency key.
    pub async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Transaction>, DomainError> {
        self.store
            .find_by_idempotency_key(key)
            .await?
            .map(Self::from_record)
            .transpose()
    }

    /// Finds up to `limit` transactions in a status, least recently updated first.
    pub async fn find_by_status(
        &self,
        status: TransactionStatus,
        limit: usize,
    ) -> Result<Vec<Transaction>, DomainError> {
        self.store
            .find_by_status(status.as_str(), limit)
            .await?
            .into_iter()
            .map(Self::from_record)
            .collect()
    }

    /// Persists a new transaction together with its events.
    pub async fn insert(
        &self,
        tx: &mut Transaction,
        events: &[TransactionEvent],
    ) -> Result<(), DomainError> {
        let record = Self::to_record(tx)?;
        let outbox = Self::build_outbox(tx.id(), events)?;

        let version = self.store.insert_transaction(record, outbox).await?;
        tx.set_version(version);
        Ok(())
    }

    /// Persists a state change together with its events.
    ///
    /// Fails with a concurrency conflict if the row moved past the version
    /// `tx` was loaded at.
    pub async fn save(
        &self,
        tx: &mut Transaction,
        events: &[TransactionEvent],
    ) -> Result<(), DomainError> {
        let record = Self::to_record(tx)?;
        let outbox = Self::build_outbox(tx.id(), events)?;

        let version = self
            .store
            .update_transaction(record, tx.version(), outbox)
            .await?;
        tx.set_version(version);
        Ok(())
    }

    /// Loads a transaction, applies `command_fn` and persists the result.
    ///
    /// The command receives the loaded transaction and returns the events its
    /// change produced, or an error to abort without writing.
    pub async fn execute<F>(
        &self,
        id: TransactionId,
        command_fn: F,
    ) -> Result<Transaction, DomainError>
    where
        F: FnOnce(&mut Transaction) -> Result<Vec<TransactionEvent>, TransactionError>,
    {
        let mut tx = self.load_existing(id).await?;
        let events = command_fn(&mut tx)?;
        self.save(&mut tx, &events).await?;
        Ok(tx)
    }

    fn to_record(tx: &Transaction) -> Result<TransactionRecord, DomainError> {
        let mut record = TransactionRecord::new(
            tx.id(),
            tx.idempotency_key(),
            tx.status().as_str(),
            tx.created_at(),
            serde_json::to_value(tx)?,
        );
        record.version = tx.version();
        if let Some(updated_at) = tx.updated_at() {
            record.updated_at = updated_at;
        }
        Ok(record)
    }

    fn from_record(record: TransactionRecord) -> Result<Transaction, DomainError> {
        let mut tx: Transaction = serde_json::from_value(record.state)?;
        tx.set_version(record.version);
        Ok(tx)
    }

    /// Builds outbox messages from domain events.
    fn build_outbox(
        id: TransactionId,
        events: &[TransactionEvent],
    ) -> Result<Vec<OutboxMessage>, DomainError> {
        events
            .iter()
            .map(|event| -> Result<OutboxMessage, DomainError> {
                Ok(OutboxMessage::new(
                    id,
                    event.event_type(),
                    event.to_payload()?,
                ))
            })
            .collect()
    }
}
