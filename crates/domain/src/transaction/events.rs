//! Transaction domain events.
//!
//! Events are written to the outbox as `(event_type, payload)` pairs, where
//! the payload is the variant's data only. [`TransactionEvent::decode`] is
//! the registry that turns a stored pair back into an event.

use chrono::{DateTime, Utc};
use common::TransactionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::DomainEvent;
use crate::money::{Currency, Money};

use super::Transaction;

/// Errors raised when an outbox message cannot be turned back into an event.
#[derive(Debug, Error)]
pub enum EventDecodeError {
    /// The event type is not part of the registry.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// The payload does not match the event type's schema.
    #[error("Invalid payload for {event_type}: {source}")]
    InvalidPayload {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Events that can occur on a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TransactionEvent {
    /// Transaction was created.
    TransactionCreated(TransactionCreatedData),

    /// The processor approved the payment.
    TransactionCompleted(TransactionCompletedData),

    /// The payment failed permanently.
    TransactionFailed(TransactionFailedData),

    /// The payment was refunded.
    TransactionRefunded(TransactionRefundedData),

    /// The transaction was cancelled.
    TransactionCancelled(TransactionCancelledData),
}

impl DomainEvent for TransactionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransactionEvent::TransactionCreated(_) => "TransactionCreated",
            TransactionEvent::TransactionCompleted(_) => "TransactionCompleted",
            TransactionEvent::TransactionFailed(_) => "TransactionFailed",
            TransactionEvent::TransactionRefunded(_) => "TransactionRefunded",
            TransactionEvent::TransactionCancelled(_) => "TransactionCancelled",
        }
    }
}

/// Data for TransactionCreated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionCreatedData {
    pub transaction_id: TransactionId,
    pub transaction_number: String,
    pub idempotency_key: String,
    pub amount: Money,
    pub currency: Currency,
    pub customer_id: String,
    pub order_id: String,
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
}

/// Data for TransactionCompleted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionCompletedData {
    pub transaction_id: TransactionId,
    pub transaction_number: String,

    /// Identifier assigned by the processor.
    pub processor_transaction_id: String,

    /// Processor response code.
    pub response_code: String,

    /// Attempt that succeeded.
    pub attempt_count: u32,

    pub completed_at: DateTime<Utc>,
}

/// Data for TransactionFailed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFailedData {
    pub transaction_id: TransactionId,
    pub transaction_number: String,
    pub reason: String,
    pub response_code: Option<String>,
    pub attempt_count: u32,
    pub failed_at: DateTime<Utc>,
}

/// Data for TransactionRefunded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRefundedData {
    pub transaction_id: TransactionId,
    pub transaction_number: String,
    pub processor_refund_id: String,
    pub amount: Money,
    pub currency: Currency,
    pub refunded_at: DateTime<Utc>,
}

/// Data for TransactionCancelled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionCancelledData {
    pub transaction_id: TransactionId,
    pub transaction_number: String,
    pub reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

// Convenience constructors
impl TransactionEvent {
    /// Every event type the registry can decode.
    pub const EVENT_TYPES: [&'static str; 5] = [
        "TransactionCreated",
        "TransactionCompleted",
        "TransactionFailed",
        "TransactionRefunded",
        "TransactionCancelled",
    ];

    /// Creates a TransactionCreated event for a new transaction.
    pub fn created(tx: &Transaction) -> Self {
        TransactionEvent::TransactionCreated(TransactionCreatedData {
            transaction_id: tx.id(),
            transaction_number: tx.transaction_number().to_string(),
            idempotency_key: tx.idempotency_key().to_string(),
            amount: tx.amount(),
            currency: tx.currency().clone(),
            customer_id: tx.customer_id().to_string(),
            order_id: tx.order_id().to_string(),
            payment_method: tx.payment_method().to_string(),
            created_at: tx.created_at(),
        })
    }

    /// Creates a TransactionCompleted event from a completed transaction.
    pub fn completed(tx: &Transaction) -> Self {
        TransactionEvent::TransactionCompleted(TransactionCompletedData {
            transaction_id: tx.id(),
            transaction_number: tx.transaction_number().to_string(),
            processor_transaction_id: tx.processor_transaction_id().unwrap_or_default().to_string(),
            response_code: tx.processor_response_code().unwrap_or_default().to_string(),
            attempt_count: tx.attempt_count(),
            completed_at: tx.completed_at().unwrap_or_else(Utc::now),
        })
    }

    /// Creates a TransactionFailed event from a failed transaction.
    pub fn failed(tx: &Transaction) -> Self {
        TransactionEvent::TransactionFailed(TransactionFailedData {
            transaction_id: tx.id(),
            transaction_number: tx.transaction_number().to_string(),
            reason: tx.failure_reason().unwrap_or_default().to_string(),
            response_code: tx.processor_response_code().map(str::to_string),
            attempt_count: tx.attempt_count(),
            failed_at: tx.completed_at().unwrap_or_else(Utc::now),
        })
    }

    /// Creates a TransactionRefunded event from a refunded transaction.
    pub fn refunded(tx: &Transaction) -> Self {
        TransactionEvent::TransactionRefunded(TransactionRefundedData {
            transaction_id: tx.id(),
            transaction_number: tx.transaction_number().to_string(),
            processor_refund_id: tx.processor_refund_id().unwrap_or_default().to_string(),
            amount: tx.amount(),
            currency: tx.currency().clone(),
            refunded_at: tx.completed_at().unwrap_or_else(Utc::now),
        })
    }

    /// Creates a TransactionCancelled event from a cancelled transaction.
    pub fn cancelled(tx: &Transaction, reason: Option<String>) -> Self {
        TransactionEvent::TransactionCancelled(TransactionCancelledData {
            transaction_id: tx.id(),
            transaction_number: tx.transaction_number().to_string(),
            reason,
            cancelled_at: tx.completed_at().unwrap_or_else(Utc::now),
        })
    }

    /// Returns the transaction the event belongs to.
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            TransactionEvent::TransactionCreated(data) => data.transaction_id,
            TransactionEvent::TransactionCompleted(data) => data.transaction_id,
            TransactionEvent::TransactionFailed(data) => data.transaction_id,
            TransactionEvent::TransactionRefunded(data) => data.transaction_id,
            TransactionEvent::TransactionCancelled(data) => data.transaction_id,
        }
    }

    /// Serializes the variant's data as the outbox payload.
    pub fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            TransactionEvent::TransactionCreated(data) => serde_json::to_value(data),
            TransactionEvent::TransactionCompleted(data) => serde_json::to_value(data),
            TransactionEvent::TransactionFailed(data) => serde_json::to_value(data),
            TransactionEvent::TransactionRefunded(data) => serde_json::to_value(data),
            TransactionEvent::TransactionCancelled(data) => serde_json::to_value(data),
        }
    }

    /// Rebuilds an event from a stored event type and payload.
    pub fn decode(event_type: &str, payload: serde_json::Value) -> Result<Self, EventDecodeError> {
        fn parse<T: serde::de::DeserializeOwned>(
            event_type: &str,
            payload: serde_json::Value,
        ) -> Result<T, EventDecodeError> {
            serde_json::from_value(payload).map_err(|source| EventDecodeError::InvalidPayload {
                event_type: event_type.to_string(),
                source,
            })
        }

        match event_type {
            "TransactionCreated" => Ok(TransactionEvent::TransactionCreated(parse(
                event_type, payload,
            )?)),
            "TransactionCompleted" => Ok(TransactionEvent::TransactionCompleted(parse(
                event_type, payload,
            )?)),
            "TransactionFailed" => Ok(TransactionEvent::TransactionFailed(parse(
                event_type, payload,
            )?)),
            "TransactionRefunded" => Ok(TransactionEvent::TransactionRefunded(parse(
                event_type, payload,
            )?)),
            "TransactionCancelled" => Ok(TransactionEvent::TransactionCancelled(parse(
                event_type, payload,
            )?)),
            other => Err(EventDecodeError::UnknownEventType(other.to_string())),
        }
    }
}
