//! Domain layer for the payment processing system.
//!
//! This crate provides:
//! - `Money` and `Currency` value types
//! - the `Transaction` aggregate and its lifecycle state machine
//! - `TransactionEvent`, the closed set of events written to the outbox
//! - the `Scheduler` capability used to hand work to background workers
//! - `TransactionRepository` and `TransactionService` (idempotent creation)

pub mod error;
pub mod event;
pub mod money;
pub mod repository;
pub mod scheduler;
pub mod transaction;

pub use error::DomainError;
pub use event::DomainEvent;
pub use money::{Currency, Money, MoneyError};
pub use repository::TransactionRepository;
pub use scheduler::{
    ChannelScheduler, InMemoryScheduler, ScheduledTask, Scheduler, SchedulerError, Task,
};
pub use transaction::{
    CreateTransaction, DerivedTransactionNumber, EventDecodeError, MAX_ATTEMPTS, MAX_BACKOFF,
    Transaction, TransactionCancelledData, TransactionCompletedData, TransactionCreatedData,
    TransactionError, TransactionEvent, TransactionFailedData, TransactionNumberGenerator,
    TransactionRefundedData, TransactionService, TransactionStatus, UnknownStatus, backoff_delay,
};
