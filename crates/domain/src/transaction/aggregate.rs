//! Transaction aggregate implementation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::TransactionId;
use payment_store::Version;
use serde::{Deserialize, Serialize};

use crate::money::{Currency, Money};

use super::{
    CreateTransaction, TransactionError, TransactionStatus,
    backoff::{MAX_ATTEMPTS, backoff_delay},
};

/// Payment transaction aggregate root.
///
/// Tracks a single payment from creation through processing attempts to a
/// terminal outcome. All mutation goes through the transition methods,
/// which reject illegal transitions without touching any field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier.
    id: TransactionId,

    /// Row version for optimistic concurrency. Owned by the store.
    #[serde(skip)]
    version: Version,

    /// Client-supplied idempotency key.
    idempotency_key: String,

    /// Human-facing transaction number.
    transaction_number: String,

    amount: Money,
    currency: Currency,
    customer_id: String,
    order_id: String,
    payment_method: String,
    description: Option<String>,

    /// Current lifecycle status.
    status: TransactionStatus,

    /// Number of times the transaction entered Processing.
    attempt_count: u32,

    processor_transaction_id: Option<String>,
    processor_response_code: Option<String>,
    processor_raw_response: Option<String>,
    processor_refund_id: Option<String>,
    failure_reason: Option<String>,

    /// When the next retry is due.
    scheduled_reconciliation_at: Option<DateTime<Utc>>,

    /// When the reconciler last inspected this transaction.
    last_reconciled_at: Option<DateTime<Utc>>,

    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,

    /// First entry into Processing; never overwritten.
    processing_started_at: Option<DateTime<Utc>>,

    /// When a terminal status was reached.
    completed_at: Option<DateTime<Utc>>,

    /// Most recent entry into Processing.
    last_attempt_at: Option<DateTime<Utc>>,

    /// When a refund call was last claimed. Cleared when the call fails.
    #[serde(default)]
    refund_attempted_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Creates a new transaction in Pending.
    pub fn create(
        id: TransactionId,
        transaction_number: impl Into<String>,
        created_at: DateTime<Utc>,
        cmd: &CreateTransaction,
    ) -> Result<Self, TransactionError> {
        if !cmd.amount.is_positive() {
            return Err(TransactionError::InvalidAmount {
                minor_units: cmd.amount.minor_units(),
            });
        }
        if cmd.idempotency_key.trim().is_empty() {
            return Err(TransactionError::MissingField("idempotency_key"));
        }

        Ok(Self {
            id,
            version: Version::initial(),
            idempotency_key: cmd.idempotency_key.clone(),
            transaction_number: transaction_number.into(),
            amount: cmd.amount,
            currency: cmd.currency.clone(),
            customer_id: cmd.customer_id.clone(),
            order_id: cmd.order_id.clone(),
            payment_method: cmd.payment_method.clone(),
            description: cmd.description.clone(),
            status: TransactionStatus::Pending,
            attempt_count: 0,
            processor_transaction_id: None,
            processor_response_code: None,
            processor_raw_response: None,
            processor_refund_id: None,
            failure_reason: None,
            scheduled_reconciliation_at: None,
            last_reconciled_at: None,
            created_at,
            updated_at: None,
            processing_started_at: None,
            completed_at: None,
            last_attempt_at: None,
            refund_attempted_at: None,
        })
    }

    // Queries

    /// Returns the transaction ID.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the row version the transaction was loaded at.
    pub fn version(&self) -> Version {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    pub fn transaction_number(&self) -> &str {
        &self.transaction_number
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn customer_id(&self) -> &str {
        &self.customer_id
    }

    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn payment_method(&self) -> &str {
        &self.payment_method
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the current status.
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Returns how many times processing has started.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn processor_transaction_id(&self) -> Option<&str> {
        self.processor_transaction_id.as_deref()
    }

    pub fn processor_response_code(&self) -> Option<&str> {
        self.processor_response_code.as_deref()
    }

    pub fn processor_raw_response(&self) -> Option<&str> {
        self.processor_raw_response.as_deref()
    }

    pub fn processor_refund_id(&self) -> Option<&str> {
        self.processor_refund_id.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn scheduled_reconciliation_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_reconciliation_at
    }

    pub fn last_reconciled_at(&self) -> Option<DateTime<Utc>> {
        self.last_reconciled_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn processing_started_at(&self) -> Option<DateTime<Utc>> {
        self.processing_started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn last_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.last_attempt_at
    }

    pub fn refund_attempted_at(&self) -> Option<DateTime<Utc>> {
        self.refund_attempted_at
    }

    /// Returns true if a refund call was claimed less than `lease` ago and
    /// may still be running.
    pub fn refund_in_flight(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        let Some(attempted_at) = self.refund_attempted_at else {
            return false;
        };
        let Ok(lease) = chrono::Duration::from_std(lease) else {
            return self.status == TransactionStatus::RefundPending;
        };
        self.status == TransactionStatus::RefundPending
            && attempted_at
                .checked_add_signed(lease)
                .is_none_or(|expires_at| now < expires_at)
    }

    /// Returns true if the transaction is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns true if another processing attempt is scheduled and allowed.
    pub fn can_retry(&self) -> bool {
        self.status == TransactionStatus::RetryScheduled && self.attempt_count < MAX_ATTEMPTS
    }

    /// Returns true if the transaction failed after exhausting its attempts.
    pub fn is_dead_letter(&self) -> bool {
        self.status == TransactionStatus::Failed && self.attempt_count >= MAX_ATTEMPTS
    }

    /// Returns the delay until the scheduled retry, if one is scheduled.
    pub fn retry_delay(&self) -> Option<Duration> {
        (self.status == TransactionStatus::RetryScheduled)
            .then(|| backoff_delay(self.attempt_count))
    }

    /// Returns true if the current attempt has been in Processing longer
    /// than `timeout`.
    pub fn is_stuck_in_processing(&self, timeout: Duration) -> bool {
        self.is_stuck_in_processing_at(timeout, Utc::now())
    }

    /// Same as [`Self::is_stuck_in_processing`], evaluated at `now`.
    ///
    /// Measured from the latest attempt start, so a retried transaction is
    /// not judged by its first attempt.
    pub fn is_stuck_in_processing_at(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        if self.status != TransactionStatus::Processing {
            return false;
        }
        let Some(started) = self.last_attempt_at.or(self.processing_started_at) else {
            return false;
        };
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return false;
        };
        now - started > timeout
    }

    // Transitions

    /// Starts a processing attempt.
    pub fn start_processing(&mut self) -> Result<(), TransactionError> {
        self.ensure(self.status.can_start_processing(), "start processing")?;

        let now = Utc::now();
        self.status = TransactionStatus::Processing;
        self.processing_started_at.get_or_insert(now);
        self.last_attempt_at = Some(now);
        self.scheduled_reconciliation_at = None;
        self.attempt_count += 1;
        self.touch(now);
        Ok(())
    }

    /// Records an approved processor response.
    pub fn mark_completed(
        &mut self,
        processor_transaction_id: impl Into<String>,
        response_code: impl Into<String>,
        raw_response: Option<String>,
    ) -> Result<(), TransactionError> {
        self.ensure(self.status.can_record_outcome(), "complete")?;

        let now = Utc::now();
        self.status = TransactionStatus::Completed;
        self.processor_transaction_id = Some(processor_transaction_id.into());
        self.processor_response_code = Some(response_code.into());
        self.processor_raw_response = raw_response;
        self.completed_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Records a failed attempt.
    ///
    /// A retryable failure with attempts left moves to RetryScheduled with the
    /// next attempt due after the backoff delay; anything else is final.
    pub fn mark_failed(
        &mut self,
        reason: impl Into<String>,
        response_code: Option<String>,
        retryable: bool,
    ) -> Result<(), TransactionError> {
        self.ensure(self.status.can_record_outcome(), "fail")?;

        let now = Utc::now();
        self.failure_reason = Some(reason.into());
        if response_code.is_some() {
            self.processor_response_code = response_code;
        }

        if retryable && self.attempt_count < MAX_ATTEMPTS {
            self.status = TransactionStatus::RetryScheduled;
            // backoff_delay is capped well inside chrono's range
            let delay = chrono::Duration::from_std(backoff_delay(self.attempt_count))
                .unwrap_or_else(|_| chrono::Duration::hours(1));
            self.scheduled_reconciliation_at = Some(now + delay);
        } else {
            self.status = TransactionStatus::Failed;
            self.scheduled_reconciliation_at = None;
            self.completed_at = Some(now);
        }
        self.touch(now);
        Ok(())
    }

    /// Requests a refund of a completed payment and claims the first
    /// refund call.
    ///
    /// RefundPending is not terminal, so the completion time is cleared until
    /// the refund is confirmed.
    pub fn initiate_refund(&mut self) -> Result<(), TransactionError> {
        self.ensure(self.status.can_initiate_refund(), "initiate refund")?;

        let now = Utc::now();
        self.status = TransactionStatus::RefundPending;
        self.completed_at = None;
        self.refund_attempted_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Claims another refund call for a transaction already in RefundPending.
    pub fn record_refund_attempt(&mut self) -> Result<(), TransactionError> {
        self.ensure(
            self.status == TransactionStatus::RefundPending,
            "retry refund",
        )?;

        let now = Utc::now();
        self.refund_attempted_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Releases the refund claim after a refused or failed refund call.
    pub fn release_refund_attempt(&mut self) {
        if self.refund_attempted_at.take().is_some() {
            self.touch(Utc::now());
        }
    }

    /// Records a confirmed refund.
    pub fn complete_refund(
        &mut self,
        processor_refund_id: impl Into<String>,
        response_code: impl Into<String>,
    ) -> Result<(), TransactionError> {
        self.ensure(self.status.can_complete_refund(), "complete refund")?;

        let now = Utc::now();
        self.status = TransactionStatus::Refunded;
        self.processor_refund_id = Some(processor_refund_id.into());
        self.processor_response_code = Some(response_code.into());
        self.refund_attempted_at = None;
        self.completed_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Cancels the transaction.
    pub fn cancel(&mut self) -> Result<(), TransactionError> {
        self.ensure(self.status.can_cancel(), "cancel")?;

        let now = Utc::now();
        self.status = TransactionStatus::Cancelled;
        self.scheduled_reconciliation_at = None;
        self.completed_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Stamps the time the reconciler inspected this transaction.
    pub fn mark_reconciled(&mut self, at: DateTime<Utc>) {
        self.last_reconciled_at = Some(at);
        self.touch(at);
    }

    fn ensure(&self, allowed: bool, action: &'static str) -> Result<(), TransactionError> {
        if allowed {
            Ok(())
        } else {
            Err(TransactionError::InvalidStateTransition {
                current_state: self.status,
                action,
            })
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = Some(now);
    }
}
