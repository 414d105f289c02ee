//! Payment processing for transactions.
//!
//! This crate drives transactions through the external payment processor:
//!
//! - [`ProcessingOrchestrator`] runs one processing attempt per invocation,
//!   schedules retries with backoff and routes exhausted transactions to
//!   the dead-letter handler; it also runs refunds
//! - [`DeadLetterHandler`] hands failed transactions to manual review
//! - [`Reconciler`] recovers transactions whose scheduled work was lost

pub mod dead_letter;
pub mod error;
pub mod orchestrator;
pub mod processor;
pub mod reconciler;

pub use dead_letter::{
    DeadLetterEntry, DeadLetterHandler, InMemoryNotifier, LoggingNotifier, Notifier,
};
pub use error::{NotifyError, ProcessingError, Result};
pub use orchestrator::{OrchestratorConfig, ProcessingOrchestrator, ProcessingOutcome, SkipReason};
pub use processor::{
    InMemoryPaymentProcessor, PaymentProcessor, ProcessorError, ProcessorErrorKind,
    ProcessorResponse,
};
pub use reconciler::{Reconciler, ReconcilerConfig, ReconciliationReport};
