//! Persistence for payment transactions and their outbox messages.
//!
//! The store is deliberately unaware of the transaction state machine: it
//! keeps each transaction as a serialized state document plus the indexed
//! columns it needs to enforce idempotency-key uniqueness and optimistic
//! concurrency. Outbox messages are written in the same atomic commit as the
//! transaction row that produced them.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use common::{MessageId, TransactionId};
pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use record::{OutboxMessage, TransactionRecord, Version};
pub use store::{OutboxStore, TransactionStore, validate_outbox_for_write};
