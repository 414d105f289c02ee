//! Transaction lifecycle state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The status of a payment transaction in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Processing ──┬──► Completed ──► RefundPending ──► Refunded
///                ▲         │
///                │         ├──► RetryScheduled ──┐
///                └─────────┼─────────────────────┘
///                          └──► Failed
///
/// Pending, Processing, RetryScheduled, RefundPending ──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TransactionStatus {
    /// Created and waiting for its first processing attempt.
    #[default]
    Pending,

    /// A processor call is in flight.
    Processing,

    /// The last attempt failed transiently; another attempt is scheduled.
    RetryScheduled,

    /// The processor approved the payment (terminal unless refunded).
    Completed,

    /// The payment failed permanently or ran out of attempts (terminal state).
    Failed,

    /// A refund has been requested and not yet confirmed.
    RefundPending,

    /// The refund was confirmed (terminal state).
    Refunded,

    /// The transaction was cancelled (terminal state).
    Cancelled,
}

impl TransactionStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [TransactionStatus; 8] = [
        TransactionStatus::Pending,
        TransactionStatus::Processing,
        TransactionStatus::RetryScheduled,
        TransactionStatus::Completed,
        TransactionStatus::Failed,
        TransactionStatus::RefundPending,
        TransactionStatus::Refunded,
        TransactionStatus::Cancelled,
    ];

    /// Returns true if a processing attempt can start in this status.
    pub fn can_start_processing(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Pending | TransactionStatus::RetryScheduled
        )
    }

    /// Returns true if an attempt outcome can be recorded in this status.
    pub fn can_record_outcome(&self) -> bool {
        matches!(self, TransactionStatus::Processing)
    }

    /// Returns true if a refund can be requested in this status.
    pub fn can_initiate_refund(&self) -> bool {
        matches!(self, TransactionStatus::Completed)
    }

    /// Returns true if a refund can be confirmed in this status.
    pub fn can_complete_refund(&self) -> bool {
        matches!(self, TransactionStatus::RefundPending)
    }

    /// Returns true if the transaction can be cancelled in this status.
    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Pending
                | TransactionStatus::Processing
                | TransactionStatus::RetryScheduled
                | TransactionStatus::RefundPending
        )
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed
                | TransactionStatus::Failed
                | TransactionStatus::Refunded
                | TransactionStatus::Cancelled
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "Pending",
            TransactionStatus::Processing => "Processing",
            TransactionStatus::RetryScheduled => "RetryScheduled",
            TransactionStatus::Completed => "Completed",
            TransactionStatus::Failed => "Failed",
            TransactionStatus::RefundPending => "RefundPending",
            TransactionStatus::Refunded => "Refunded",
            TransactionStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown transaction status: '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for TransactionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(TransactionStatus::default(), TransactionStatus::Pending);
    }

    #[test]
    fn test_processing_starts_from_pending_or_retry() {
        assert!(TransactionStatus::Pending.can_start_processing());
        assert!(TransactionStatus::RetryScheduled.can_start_processing());
        assert!(!TransactionStatus::Processing.can_start_processing());
        assert!(!TransactionStatus::Completed.can_start_processing());
        assert!(!TransactionStatus::Failed.can_start_processing());
        assert!(!TransactionStatus::RefundPending.can_start_processing());
        assert!(!TransactionStatus::Refunded.can_start_processing());
        assert!(!TransactionStatus::Cancelled.can_start_processing());
    }

    #[test]
    fn test_only_processing_records_outcome() {
        for status in TransactionStatus::ALL {
            assert_eq!(
                status.can_record_outcome(),
                status == TransactionStatus::Processing,
                "{status}"
            );
        }
    }

    #[test]
    fn test_refund_path() {
        assert!(TransactionStatus::Completed.can_initiate_refund());
        assert!(!TransactionStatus::Pending.can_initiate_refund());
        assert!(!TransactionStatus::Failed.can_initiate_refund());
        assert!(TransactionStatus::RefundPending.can_complete_refund());
        assert!(!TransactionStatus::Completed.can_complete_refund());
    }

    #[test]
    fn test_can_cancel_from_non_terminal_states() {
        assert!(TransactionStatus::Pending.can_cancel());
        assert!(TransactionStatus::Processing.can_cancel());
        assert!(TransactionStatus::RetryScheduled.can_cancel());
        assert!(TransactionStatus::RefundPending.can_cancel());
        assert!(!TransactionStatus::Completed.can_cancel());
        assert!(!TransactionStatus::Failed.can_cancel());
        assert!(!TransactionStatus::Refunded.can_cancel());
        assert!(!TransactionStatus::Cancelled.can_cancel());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(!TransactionStatus::Processing.is_terminal());
        assert!(!TransactionStatus::RetryScheduled.is_terminal());
        assert!(TransactionStatus::Completed.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
        assert!(!TransactionStatus::RefundPending.is_terminal());
        assert!(TransactionStatus::Refunded.is_terminal());
        assert!(TransactionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_name_round_trips() {
        for status in TransactionStatus::ALL {
            assert_eq!(status.as_str().parse::<TransactionStatus>(), Ok(status));
        }
        assert!("Unknown".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&TransactionStatus::RetryScheduled).unwrap();
        assert_eq!(json, "\"RetryScheduled\"");
    }
}
