//! Transaction number generation.

use chrono::{DateTime, Utc};
use common::TransactionId;

/// Produces the human-facing transaction number for a new transaction.
///
/// Implementations must return a value that is unique without consulting
/// the store.
pub trait TransactionNumberGenerator: Send + Sync {
    /// Generates a number for the transaction with the given identifier.
    fn generate(&self, id: TransactionId, created_at: DateTime<Utc>) -> String;
}

/// Derives the number from the creation date and the transaction's UUID.
///
/// Format: `TXN-YYYYMMDD-<32 upper-case hex digits>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DerivedTransactionNumber;

impl TransactionNumberGenerator for DerivedTransactionNumber {
    fn generate(&self, id: TransactionId, created_at: DateTime<Utc>) -> String {
        format!(
            "TXN-{}-{}",
            created_at.format("%Y%m%d"),
            id.as_uuid().simple().to_string().to_ascii_uppercase()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_number_embeds_date_and_id() {
        let id = TransactionId::new();
        let created_at = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();

        let number = DerivedTransactionNumber.generate(id, created_at);

        assert!(number.starts_with("TXN-20240309-"));
        assert!(number.ends_with(&id.as_uuid().simple().to_string().to_ascii_uppercase()));
    }

    #[test]
    fn test_distinct_ids_give_distinct_numbers() {
        let now = Utc::now();
        let a = DerivedTransactionNumber.generate(TransactionId::new(), now);
        let b = DerivedTransactionNumber.generate(TransactionId::new(), now);
        assert_ne!(a, b);
    }
}
