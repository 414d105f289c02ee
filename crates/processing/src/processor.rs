//! Payment processor capability and in-memory implementation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::TransactionId;
use domain::Transaction;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

/// Result of a successful processor call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorResponse {
    /// Identifier assigned by the processor.
    pub processor_transaction_id: String,

    /// Processor response code (e.g. "00" for approved).
    pub response_code: String,

    /// Raw processor response, kept for audit.
    pub raw_response: Option<String>,
}

impl ProcessorResponse {
    /// Creates an approved response.
    pub fn approved(processor_transaction_id: impl Into<String>) -> Self {
        Self {
            processor_transaction_id: processor_transaction_id.into(),
            response_code: "00".to_string(),
            raw_response: None,
        }
    }
}

/// How a processor failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessorErrorKind {
    /// Safe to retry (timeouts, rate limits, gateway errors).
    Transient,

    /// Retrying cannot succeed (declined, invalid card).
    Permanent,

    /// The call produced no structured result. Treated as retryable.
    UnexpectedFault,
}

impl ProcessorErrorKind {
    /// Returns the kind name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorErrorKind::Transient => "Transient",
            ProcessorErrorKind::Permanent => "Permanent",
            ProcessorErrorKind::UnexpectedFault => "UnexpectedFault",
        }
    }
}

impl std::fmt::Display for ProcessorErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failed processor call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} processor error {code}: {description}")]
pub struct ProcessorError {
    pub kind: ProcessorErrorKind,
    pub code: String,
    pub description: String,
}

impl ProcessorError {
    /// Creates a transient failure.
    pub fn transient(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: ProcessorErrorKind::Transient,
            code: code.into(),
            description: description.into(),
        }
    }

    /// Creates a permanent failure.
    pub fn permanent(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: ProcessorErrorKind::Permanent,
            code: code.into(),
            description: description.into(),
        }
    }

    /// Creates an unexpected fault.
    pub fn unexpected(description: impl Into<String>) -> Self {
        Self {
            kind: ProcessorErrorKind::UnexpectedFault,
            code: "FAULT".to_string(),
            description: description.into(),
        }
    }

    /// Returns true if another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind != ProcessorErrorKind::Permanent
    }
}

/// Capability for calling the external payment processor.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Charges the transaction's payment method.
    async fn process_payment(&self, tx: &Transaction) -> Result<ProcessorResponse, ProcessorError>;

    /// Refunds a previously completed charge.
    async fn refund_payment(&self, tx: &Transaction) -> Result<ProcessorResponse, ProcessorError>;
}

#[async_trait]
impl<T: PaymentProcessor + ?Sized> PaymentProcessor for Arc<T> {
    async fn process_payment(&self, tx: &Transaction) -> Result<ProcessorResponse, ProcessorError> {
        (**self).process_payment(tx).await
    }

    async fn refund_payment(&self, tx: &Transaction) -> Result<ProcessorResponse, ProcessorError> {
        (**self).refund_payment(tx).await
    }
}

#[derive(Debug, Default)]
struct InMemoryProcessorState {
    payment_outcomes: VecDeque<Result<ProcessorResponse, ProcessorError>>,
    refund_outcomes: VecDeque<Result<ProcessorResponse, ProcessorError>>,
    payment_calls: Vec<TransactionId>,
    refund_calls: Vec<TransactionId>,
    next_id: u32,
    latency: Option<Duration>,
}

/// In-memory payment processor for testing and local runs.
///
/// Approves every call unless outcomes have been queued with
/// [`push_payment_outcome`](Self::push_payment_outcome) or
/// [`push_refund_outcome`](Self::push_refund_outcome); queued outcomes are
/// returned first, in order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentProcessor {
    state: Arc<Mutex<InMemoryProcessorState>>,
}

impl InMemoryPaymentProcessor {
    /// Creates a new processor that approves every call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the outcome of a future payment call.
    pub async fn push_payment_outcome(&self, outcome: Result<ProcessorResponse, ProcessorError>) {
        self.state.lock().await.payment_outcomes.push_back(outcome);
    }

    /// Queues `count` identical payment failures.
    pub async fn fail_payments(&self, count: usize, error: ProcessorError) {
        let mut state = self.state.lock().await;
        for _ in 0..count {
            state.payment_outcomes.push_back(Err(error.clone()));
        }
    }

    /// Queues the outcome of a future refund call.
    pub async fn push_refund_outcome(&self, outcome: Result<ProcessorResponse, ProcessorError>) {
        self.state.lock().await.refund_outcomes.push_back(outcome);
    }

    /// Makes every call take `latency` before answering.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = Some(latency);
    }

    /// Returns the transactions charged, in call order.
    pub async fn payment_calls(&self) -> Vec<TransactionId> {
        self.state.lock().await.payment_calls.clone()
    }

    /// Returns the number of payment calls.
    pub async fn payment_call_count(&self) -> usize {
        self.state.lock().await.payment_calls.len()
    }

    /// Returns the number of refund calls.
    pub async fn refund_call_count(&self) -> usize {
        self.state.lock().await.refund_calls.len()
    }

    async fn wait_latency(&self) {
        let latency = self.state.lock().await.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PaymentProcessor for InMemoryPaymentProcessor {
    async fn process_payment(&self, tx: &Transaction) -> Result<ProcessorResponse, ProcessorError> {
        self.wait_latency().await;

        let mut state = self.state.lock().await;
        state.payment_calls.push(tx.id());
        if let Some(outcome) = state.payment_outcomes.pop_front() {
            return outcome;
        }

        state.next_id += 1;
        Ok(ProcessorResponse {
            processor_transaction_id: format!("PROC-{:04}", state.next_id),
            response_code: "00".to_string(),
            raw_response: Some(format!(
                r#"{{"status":"approved","amount":"{}","currency":"{}"}}"#,
                tx.amount(),
                tx.currency()
            )),
        })
    }

    async fn refund_payment(&self, tx: &Transaction) -> Result<ProcessorResponse, ProcessorError> {
        self.wait_latency().await;

        let mut state = self.state.lock().await;
        state.refund_calls.push(tx.id());
        if let Some(outcome) = state.refund_outcomes.pop_front() {
            return outcome;
        }

        state.next_id += 1;
        Ok(ProcessorResponse::approved(format!("REF-{:04}", state.next_id)))
    }
}
