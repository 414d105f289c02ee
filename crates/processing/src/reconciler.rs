//! Reconciliation sweep for transactions whose scheduled work was lost.
//!
//! Delayed and follow-up tasks live in the scheduler, not in the store, so a
//! restart can drop them. The sweep finds transactions that should have moved
//! on and puts them back in motion:
//!
//! - Processing for longer than the stuck timeout: the attempt is failed as
//!   an unexpected fault and follows the usual retry / dead-letter branch
//! - RetryScheduled past its due time: processing is re-enqueued
//! - Pending for longer than the grace period: processing is re-enqueued
//!
//! Every transaction acted on gets `last_reconciled_at` stamped.

use std::time::Duration;

use chrono::{DateTime, Utc};
use domain::{Scheduler, Task, Transaction, TransactionEvent, TransactionRepository, TransactionStatus};
use payment_store::TransactionStore;

use crate::error::Result;
use crate::orchestrator::schedule_follow_up;

/// Settings for the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// How long an attempt may stay in Processing before it is failed.
    pub stuck_processing_timeout: Duration,

    /// How long a transaction may stay Pending before processing is re-enqueued.
    pub pending_grace_period: Duration,

    /// Maximum transactions inspected per status per run.
    pub batch_size: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            stuck_processing_timeout: Duration::from_secs(600),
            pending_grace_period: Duration::from_secs(120),
            batch_size: 100,
        }
    }
}

/// Outcome of a reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// Stuck Processing transactions that were failed.
    pub stuck_failed: usize,

    /// Overdue retries that were re-enqueued.
    pub retries_requeued: usize,

    /// Stale Pending transactions that were re-enqueued.
    pub pending_requeued: usize,

    /// Transactions skipped because another writer moved them first.
    pub conflicts: usize,
}

/// Recovers transactions whose scheduled work was lost.
pub struct Reconciler<S: TransactionStore, Sc: Scheduler> {
    repository: TransactionRepository<S>,
    scheduler: Sc,
    config: ReconcilerConfig,
}

impl<S: TransactionStore, Sc: Scheduler> Reconciler<S, Sc> {
    /// Creates a new reconciler with default settings.
    pub fn new(store: S, scheduler: Sc) -> Self {
        Self::with_config(store, scheduler, ReconcilerConfig::default())
    }

    /// Creates a new reconciler with the given settings.
    pub fn with_config(store: S, scheduler: Sc, config: ReconcilerConfig) -> Self {
        Self {
            repository: TransactionRepository::new(store),
            scheduler,
            config,
        }
    }

    /// Runs one sweep.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconciliationReport> {
        self.reconcile_at(Utc::now()).await
    }

    /// Runs one sweep as of `now`.
    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> Result<ReconciliationReport> {
        let mut report = ReconciliationReport::default();

        self.fail_stuck_processing(now, &mut report).await?;
        self.requeue_overdue_retries(now, &mut report).await?;
        self.requeue_stale_pending(now, &mut report).await?;

        if report != ReconciliationReport::default() {
            tracing::info!(
                stuck_failed = report.stuck_failed,
                retries_requeued = report.retries_requeued,
                pending_requeued = report.pending_requeued,
                conflicts = report.conflicts,
                "Reconciliation run complete"
            );
        }
        Ok(report)
    }

    async fn fail_stuck_processing(
        &self,
        now: DateTime<Utc>,
        report: &mut ReconciliationReport,
    ) -> Result<()> {
        let processing = self
            .repository
            .find_by_status(TransactionStatus::Processing, self.config.batch_size)
            .await?;

        let timeout = self.config.stuck_processing_timeout;
        for mut tx in processing {
            if !tx.is_stuck_in_processing_at(timeout, now) {
                continue;
            }

            tracing::warn!(
                transaction_id = %tx.id(),
                attempt = tx.attempt_count(),
                "Transaction stuck in processing"
            );
            tx.mark_failed(
                format!("processing did not finish within {}s", timeout.as_secs()),
                None,
                true,
            )
            .map_err(domain::DomainError::from)?;
            tx.mark_reconciled(now);

            let events = if tx.status() == TransactionStatus::Failed {
                vec![TransactionEvent::failed(&tx)]
            } else {
                vec![]
            };
            if !self.save(&mut tx, &events, report).await? {
                continue;
            }

            schedule_follow_up(&self.scheduler, &tx).await?;
            report.stuck_failed += 1;
        }
        Ok(())
    }

    async fn requeue_overdue_retries(
        &self,
        now: DateTime<Utc>,
        report: &mut ReconciliationReport,
    ) -> Result<()> {
        let retries = self
            .repository
            .find_by_status(TransactionStatus::RetryScheduled, self.config.batch_size)
            .await?;

        for mut tx in retries {
            let overdue = tx
                .scheduled_reconciliation_at()
                .is_some_and(|due| due <= now);
            if !overdue {
                continue;
            }

            tx.mark_reconciled(now);
            if !self.save(&mut tx, &[], report).await? {
                continue;
            }

            self.scheduler
                .enqueue(Task::ProcessTransaction(tx.id()))
                .await?;
            report.retries_requeued += 1;
        }
        Ok(())
    }

    async fn requeue_stale_pending(
        &self,
        now: DateTime<Utc>,
        report: &mut ReconciliationReport,
    ) -> Result<()> {
        let pending = self
            .repository
            .find_by_status(TransactionStatus::Pending, self.config.batch_size)
            .await?;

        let grace = chrono::Duration::from_std(self.config.pending_grace_period)
            .unwrap_or_else(|_| chrono::Duration::minutes(2));
        for mut tx in pending {
            if now - tx.created_at() <= grace {
                continue;
            }

            tx.mark_reconciled(now);
            if !self.save(&mut tx, &[], report).await? {
                continue;
            }

            self.scheduler
                .enqueue(Task::ProcessTransaction(tx.id()))
                .await?;
            report.pending_requeued += 1;
        }
        Ok(())
    }

    /// Persists a reconciled transaction. Returns false if another writer
    /// moved it first.
    async fn save(
        &self,
        tx: &mut Transaction,
        events: &[TransactionEvent],
        report: &mut ReconciliationReport,
    ) -> Result<bool> {
        match self.repository.save(tx, events).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_conflict() => {
                report.conflicts += 1;
                tracing::debug!(transaction_id = %tx.id(), "Skipping transaction moved by another writer");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}
