//! Dead-letter handling for transactions that failed permanently.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::TransactionId;
use domain::{Transaction, TransactionRepository, TransactionStatus};
use payment_store::TransactionStore;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{NotifyError, Result};

/// A failed transaction handed to manual review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub transaction_id: TransactionId,
    pub transaction_number: String,
    pub status: TransactionStatus,
    pub attempt_count: u32,
    pub failure_reason: Option<String>,
    pub response_code: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    /// Builds an entry from the transaction's current state.
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id(),
            transaction_number: tx.transaction_number().to_string(),
            status: tx.status(),
            attempt_count: tx.attempt_count(),
            failure_reason: tx.failure_reason().map(str::to_string),
            response_code: tx.processor_response_code().map(str::to_string),
            recorded_at: Utc::now(),
        }
    }
}

/// Capability for raising failed transactions with operators
/// (alerting, ticketing).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Records a dead-lettered transaction for manual review.
    async fn notify(&self, entry: &DeadLetterEntry) -> std::result::Result<(), NotifyError>;
}

#[async_trait]
impl<T: Notifier + ?Sized> Notifier for Arc<T> {
    async fn notify(&self, entry: &DeadLetterEntry) -> std::result::Result<(), NotifyError> {
        (**self).notify(entry).await
    }
}

/// Notifier that writes each entry to the error log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, entry: &DeadLetterEntry) -> std::result::Result<(), NotifyError> {
        tracing::error!(
            transaction_id = %entry.transaction_id,
            transaction_number = %entry.transaction_number,
            attempts = entry.attempt_count,
            reason = entry.failure_reason.as_deref().unwrap_or_default(),
            response_code = entry.response_code.as_deref().unwrap_or_default(),
            "Transaction requires manual review"
        );
        Ok(())
    }
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    entries: Arc<RwLock<Vec<DeadLetterEntry>>>,
}

impl InMemoryNotifier {
    /// Creates a new empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every entry recorded so far.
    pub async fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, entry: &DeadLetterEntry) -> std::result::Result<(), NotifyError> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }
}

/// Terminal sink for transactions that exhausted automated processing.
///
/// Performs no state transitions; the transaction is already Failed when the
/// handler runs.
pub struct DeadLetterHandler<S: TransactionStore, N: Notifier> {
    repository: TransactionRepository<S>,
    notifier: N,
}

impl<S: TransactionStore, N: Notifier> DeadLetterHandler<S, N> {
    /// Creates a new handler.
    pub fn new(store: S, notifier: N) -> Self {
        Self {
            repository: TransactionRepository::new(store),
            notifier,
        }
    }

    /// Records a transaction for manual review. No-op if it doesn't exist.
    #[tracing::instrument(skip(self), fields(transaction_id = %id))]
    pub async fn handle(&self, id: TransactionId) -> Result<Option<DeadLetterEntry>> {
        let Some(tx) = self.repository.load(id).await? else {
            tracing::debug!("Dead-lettered transaction not found");
            return Ok(None);
        };

        if tx.status() != TransactionStatus::Failed {
            tracing::warn!(status = %tx.status(), "Dead-letter requested for non-failed transaction");
        }

        let entry = DeadLetterEntry::from_transaction(&tx);
        self.notifier.notify(&entry).await?;
        metrics::counter!("dead_letters_total").increment(1);
        Ok(Some(entry))
    }
}
