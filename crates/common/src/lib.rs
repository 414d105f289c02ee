//! Shared types for the payment processing system.

pub mod types;

pub use types::{MessageId, TransactionId};
