//! Outbox delivery for the payment processing system.
//!
//! Events are written to the outbox in the same commit as the transaction
//! change that produced them. This crate drains that outbox:
//!
//! - [`EventPublisher`]: the capability that hands an event to consumers
//! - [`OutboxRelay`]: fetches pending messages, publishes them in order and
//!   records the outcome of every attempt

pub mod error;
pub mod publisher;
pub mod relay;

pub use error::{OutboxError, PublishError, Result};
pub use publisher::{EventPublisher, InMemoryEventPublisher, LoggingEventPublisher};
pub use relay::{DeliveryReport, OutboxRelay, RelayConfig};
