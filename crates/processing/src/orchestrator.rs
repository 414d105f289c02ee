//! Processing orchestrator: one processing attempt per invocation.

use std::time::{Duration, Instant};

use chrono::Utc;
use common::TransactionId;
use domain::{
    DomainError, Scheduler, Task, Transaction, TransactionEvent, TransactionRepository,
    TransactionStatus, backoff_delay,
};
use payment_store::TransactionStore;

use crate::error::{ProcessingError, Result};
use crate::processor::{PaymentProcessor, ProcessorError, ProcessorErrorKind, ProcessorResponse};

/// Settings for the processing orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Longest a processor call may take before it counts as a fault.
    pub processor_timeout: Duration,
}

/// Slack added to the processor timeout before a refund claim is treated as
/// abandoned.
const REFUND_LEASE_MARGIN: Duration = Duration::from_secs(30);

impl OrchestratorConfig {
    /// How long a refund claim blocks other refund calls for the same
    /// transaction.
    pub fn refund_lease(&self) -> Duration {
        self.processor_timeout + REFUND_LEASE_MARGIN
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            processor_timeout: Duration::from_secs(30),
        }
    }
}

/// Why an invocation did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No transaction with the given ID.
    NotFound,

    /// The transaction already reached a terminal status.
    Terminal(TransactionStatus),

    /// The transaction is in a status processing cannot start from.
    NotReady(TransactionStatus),

    /// Another writer advanced the transaction first.
    Superseded,
}

/// Result of a single orchestrator invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// The processor approved the payment.
    Completed { attempt: u32 },

    /// The attempt failed; another one is scheduled after `delay`.
    RetryScheduled { attempt: u32, delay: Duration },

    /// The transaction failed permanently and was sent to the dead-letter handler.
    Failed { attempt: u32 },

    /// Nothing was done.
    Skipped(SkipReason),
}

/// Drives transactions through the payment processor.
///
/// `process` is safe to invoke more than once for the same transaction: it
/// re-reads the persisted row, does nothing for terminal or in-flight
/// transactions, and persists the move to Processing before the processor is
/// called. Two concurrent invocations cannot both reach the processor for the
/// same attempt; the loser's version check fails and it stands down.
pub struct ProcessingOrchestrator<S: TransactionStore, P: PaymentProcessor, Sc: Scheduler> {
    repository: TransactionRepository<S>,
    processor: P,
    scheduler: Sc,
    config: OrchestratorConfig,
}

impl<S, P, Sc> ProcessingOrchestrator<S, P, Sc>
where
    S: TransactionStore,
    P: PaymentProcessor,
    Sc: Scheduler,
{
    /// Creates a new orchestrator with default settings.
    pub fn new(store: S, processor: P, scheduler: Sc) -> Self {
        Self::with_config(store, processor, scheduler, OrchestratorConfig::default())
    }

    /// Creates a new orchestrator with the given settings.
    pub fn with_config(store: S, processor: P, scheduler: Sc, config: OrchestratorConfig) -> Self {
        Self {
            repository: TransactionRepository::new(store),
            processor,
            scheduler,
            config,
        }
    }

    /// Returns a reference to the underlying repository.
    pub fn repository(&self) -> &TransactionRepository<S> {
        &self.repository
    }

    /// Runs one processing attempt for a transaction.
    #[tracing::instrument(skip(self), fields(transaction_id = %id))]
    pub async fn process(&self, id: TransactionId) -> Result<ProcessingOutcome> {
        let Some(mut tx) = self.repository.load(id).await? else {
            tracing::debug!("Transaction not found, nothing to process");
            return Ok(ProcessingOutcome::Skipped(SkipReason::NotFound));
        };

        if tx.is_terminal() {
            tracing::debug!(status = %tx.status(), "Transaction already terminal");
            return Ok(ProcessingOutcome::Skipped(SkipReason::Terminal(tx.status())));
        }

        if tx.start_processing().is_err() {
            tracing::debug!(status = %tx.status(), "Transaction not ready for processing");
            return Ok(ProcessingOutcome::Skipped(SkipReason::NotReady(tx.status())));
        }

        match self.repository.save(&mut tx, &[]).await {
            Ok(()) => {}
            Err(err) if err.is_conflict() => {
                tracing::info!("Transaction advanced by another worker, standing down");
                return Ok(ProcessingOutcome::Skipped(SkipReason::Superseded));
            }
            Err(err) => return Err(err.into()),
        }

        let attempt = tx.attempt_count();
        tracing::info!(attempt, "Processing attempt started");

        match self.call_processor(&tx).await {
            Ok(response) => self.record_success(tx, response).await,
            Err(error) if error.kind == ProcessorErrorKind::UnexpectedFault => {
                tracing::error!(
                    attempt,
                    error = %error,
                    "Unexpected processor fault, treating as retryable"
                );
                let outcome = self.record_failure(tx, &error, true).await?;
                Err(ProcessingError::UnexpectedFault {
                    transaction_id: id,
                    description: error.description,
                    outcome,
                })
            }
            Err(error) => {
                let retryable = error.kind == ProcessorErrorKind::Transient;
                self.record_failure(tx, &error, retryable).await
            }
        }
    }

    /// Refunds a completed transaction.
    ///
    /// A claim on the refund call is persisted before the processor is
    /// called: the move to RefundPending on the first call, a fresh
    /// `refund_attempted_at` stamp when resuming. A caller that loses the
    /// version check, or finds a claim younger than the refund lease, stands
    /// down with `RefundInProgress`. If the processor refuses, the claim is
    /// released and the transaction stays RefundPending for a later call. An
    /// unexpected fault or timeout keeps the claim until the lease expires.
    #[tracing::instrument(skip(self), fields(transaction_id = %id))]
    pub async fn refund(&self, id: TransactionId) -> Result<Transaction> {
        let mut tx = self.repository.load_existing(id).await?;

        if tx.status() == TransactionStatus::RefundPending {
            if tx.refund_in_flight(Utc::now(), self.config.refund_lease()) {
                tracing::info!("Refund already in flight, standing down");
                return Err(ProcessingError::RefundInProgress(id));
            }
            tx.record_refund_attempt().map_err(DomainError::from)?;
        } else {
            tx.initiate_refund().map_err(DomainError::from)?;
        }

        match self.repository.save(&mut tx, &[]).await {
            Ok(()) => tracing::info!("Refund call claimed"),
            Err(err) if err.is_conflict() => {
                tracing::info!("Refund claimed by another caller, standing down");
                return Err(ProcessingError::RefundInProgress(id));
            }
            Err(err) => return Err(err.into()),
        }

        let started = Instant::now();
        let result = self
            .with_timeout(self.processor.refund_payment(&tx))
            .await;
        metrics::histogram!("processor_call_duration_seconds", "operation" => "refund")
            .record(started.elapsed().as_secs_f64());

        let response = match result {
            Ok(response) => response,
            Err(source) => {
                metrics::counter!("refunds_failed_total").increment(1);
                tracing::warn!(error = %source, "Refund failed, transaction left RefundPending");
                // A fault may have reached the processor; the claim holds until the lease ends
                if source.kind != ProcessorErrorKind::UnexpectedFault {
                    tx.release_refund_attempt();
                    if let Err(err) = self.repository.save(&mut tx, &[]).await {
                        tracing::warn!(error = %err, "Refund claim could not be released");
                    }
                }
                return Err(ProcessingError::RefundFailed {
                    transaction_id: id,
                    source,
                });
            }
        };

        tx.complete_refund(response.processor_transaction_id, response.response_code)
            .map_err(DomainError::from)?;
        let refunded = TransactionEvent::refunded(&tx);
        self.repository.save(&mut tx, &[refunded]).await?;

        metrics::counter!("transactions_refunded_total").increment(1);
        tracing::info!(
            processor_refund_id = tx.processor_refund_id().unwrap_or_default(),
            "Transaction refunded"
        );
        Ok(tx)
    }

    async fn call_processor(
        &self,
        tx: &Transaction,
    ) -> std::result::Result<ProcessorResponse, ProcessorError> {
        let started = Instant::now();
        let result = self.with_timeout(self.processor.process_payment(tx)).await;
        metrics::histogram!("processor_call_duration_seconds", "operation" => "payment")
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn with_timeout<F>(&self, call: F) -> std::result::Result<ProcessorResponse, ProcessorError>
    where
        F: Future<Output = std::result::Result<ProcessorResponse, ProcessorError>>,
    {
        let timeout = self.config.processor_timeout;
        tokio::time::timeout(timeout, call).await.unwrap_or_else(|_| {
            Err(ProcessorError::unexpected(format!(
                "processor call timed out after {}s",
                timeout.as_secs()
            )))
        })
    }

    async fn record_success(
        &self,
        mut tx: Transaction,
        response: ProcessorResponse,
    ) -> Result<ProcessingOutcome> {
        let attempt = tx.attempt_count();
        let processor_transaction_id = response.processor_transaction_id.clone();

        tx.mark_completed(
            response.processor_transaction_id,
            response.response_code,
            response.raw_response,
        )
        .map_err(DomainError::from)?;
        let completed = TransactionEvent::completed(&tx);

        if let Err(err) = self.repository.save(&mut tx, &[completed]).await {
            // The charge went through but the row moved on; needs manual review
            tracing::error!(
                %processor_transaction_id,
                error = %err,
                "Approved payment could not be recorded"
            );
            return Err(err.into());
        }

        metrics::counter!("transactions_completed_total").increment(1);
        tracing::info!(attempt, %processor_transaction_id, "Transaction completed");
        Ok(ProcessingOutcome::Completed { attempt })
    }

    async fn record_failure(
        &self,
        mut tx: Transaction,
        error: &ProcessorError,
        retryable: bool,
    ) -> Result<ProcessingOutcome> {
        tx.mark_failed(error.description.clone(), Some(error.code.clone()), retryable)
            .map_err(DomainError::from)?;

        let events = if tx.status() == TransactionStatus::Failed {
            vec![TransactionEvent::failed(&tx)]
        } else {
            vec![]
        };
        self.repository.save(&mut tx, &events).await?;

        schedule_follow_up(&self.scheduler, &tx).await
    }
}

/// Schedules the work that follows a persisted failure: a delayed retry or
/// dead-letter handling.
pub(crate) async fn schedule_follow_up<Sc: Scheduler>(
    scheduler: &Sc,
    tx: &Transaction,
) -> Result<ProcessingOutcome> {
    let attempt = tx.attempt_count();

    if tx.can_retry() {
        let delay = backoff_delay(attempt);
        metrics::counter!("transactions_retry_scheduled_total").increment(1);
        tracing::warn!(
            transaction_id = %tx.id(),
            attempt,
            delay_secs = delay.as_secs(),
            reason = tx.failure_reason().unwrap_or_default(),
            "Attempt failed, retry scheduled"
        );
        scheduler
            .schedule_after(Task::ProcessTransaction(tx.id()), delay)
            .await?;
        Ok(ProcessingOutcome::RetryScheduled { attempt, delay })
    } else {
        metrics::counter!("transactions_failed_total").increment(1);
        tracing::error!(
            transaction_id = %tx.id(),
            attempt,
            reason = tx.failure_reason().unwrap_or_default(),
            "Transaction failed"
        );
        scheduler.enqueue(Task::HandleDeadLetter(tx.id())).await?;
        Ok(ProcessingOutcome::Failed { attempt })
    }
}
