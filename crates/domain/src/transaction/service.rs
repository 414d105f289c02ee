//! Transaction service: idempotent creation and explicit lifecycle commands.

use std::sync::Arc;

use chrono::Utc;
use common::TransactionId;
use payment_store::{StoreError, TransactionStore};

use crate::error::DomainError;
use crate::repository::TransactionRepository;
use crate::scheduler::{Scheduler, Task};

use super::{
    CreateTransaction, DerivedTransactionNumber, Transaction, TransactionEvent,
    TransactionNumberGenerator, TransactionStatus,
};

/// Service for creating and managing payment transactions.
///
/// Creation is idempotent on the client's key: a repeated request returns the
/// stored transaction unchanged and schedules nothing. A new transaction is
/// written with its `TransactionCreated` outbox message in one commit, and
/// processing is only scheduled after that commit succeeds.
pub struct TransactionService<S: TransactionStore, Sc: Scheduler> {
    repository: TransactionRepository<S>,
    scheduler: Sc,
    numbers: Arc<dyn TransactionNumberGenerator>,
}

impl<S: TransactionStore, Sc: Scheduler> TransactionService<S, Sc> {
    /// Creates a new transaction service.
    pub fn new(store: S, scheduler: Sc) -> Self {
        Self {
            repository: TransactionRepository::new(store),
            scheduler,
            numbers: Arc::new(DerivedTransactionNumber),
        }
    }

    /// Replaces the transaction number generator.
    pub fn with_number_generator(mut self, numbers: Arc<dyn TransactionNumberGenerator>) -> Self {
        self.numbers = numbers;
        self
    }

    /// Returns a reference to the underlying repository.
    pub fn repository(&self) -> &TransactionRepository<S> {
        &self.repository
    }

    /// Creates a transaction, or returns the one already holding the key.
    #[tracing::instrument(skip(self, cmd), fields(idempotency_key = %cmd.idempotency_key))]
    pub async fn create(&self, cmd: CreateTransaction) -> Result<Transaction, DomainError> {
        if let Some(existing) = self
            .repository
            .find_by_idempotency_key(&cmd.idempotency_key)
            .await?
        {
            metrics::counter!("transactions_idempotent_hits_total").increment(1);
            tracing::info!(
                transaction_id = %existing.id(),
                status = %existing.status(),
                "Returning existing transaction for idempotency key"
            );
            return Ok(existing);
        }

        let id = TransactionId::new();
        let created_at = Utc::now();
        let number = self.numbers.generate(id, created_at);
        let mut tx = Transaction::create(id, number, created_at, &cmd)?;
        let created = TransactionEvent::created(&tx);

        match self.repository.insert(&mut tx, &[created]).await {
            Ok(()) => {}
            Err(DomainError::Store(StoreError::DuplicateIdempotencyKey(key))) => {
                // Lost the insert race; the winner's row is authoritative
                metrics::counter!("transactions_idempotent_hits_total").increment(1);
                return self
                    .repository
                    .find_by_idempotency_key(&key)
                    .await?
                    .ok_or(DomainError::Store(StoreError::DuplicateIdempotencyKey(key)));
            }
            Err(err) => return Err(err),
        }

        metrics::counter!("transactions_created_total").increment(1);
        tracing::info!(
            transaction_id = %tx.id(),
            transaction_number = %tx.transaction_number(),
            amount = %tx.amount(),
            currency = %tx.currency(),
            "Transaction created"
        );

        if let Err(err) = self.scheduler.enqueue(Task::ProcessTransaction(id)).await {
            // The row is committed; the reconciler re-enqueues stale Pending rows
            tracing::warn!(
                transaction_id = %id,
                error = %err,
                "Failed to enqueue processing after commit"
            );
        }

        Ok(tx)
    }

    /// Gets a transaction by ID.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, id: TransactionId) -> Result<Option<Transaction>, DomainError> {
        self.repository.load(id).await
    }

    /// Gets the transaction holding an idempotency key.
    #[tracing::instrument(skip(self))]
    pub async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Transaction>, DomainError> {
        self.repository.find_by_idempotency_key(key).await
    }

    /// Lists up to `limit` transactions in a status.
    #[tracing::instrument(skip(self))]
    pub async fn find_by_status(
        &self,
        status: TransactionStatus,
        limit: usize,
    ) -> Result<Vec<Transaction>, DomainError> {
        self.repository.find_by_status(status, limit).await
    }

    /// Cancels a transaction that has not reached a terminal status.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(
        &self,
        id: TransactionId,
        reason: Option<String>,
    ) -> Result<Transaction, DomainError> {
        let tx = self
            .repository
            .execute(id, |tx| {
                tx.cancel()?;
                Ok(vec![TransactionEvent::cancelled(tx, reason)])
            })
            .await?;

        metrics::counter!("transactions_cancelled_total").increment(1);
        tracing::info!(transaction_id = %id, "Transaction cancelled");
        Ok(tx)
    }
}
