//! Event publisher capability.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::MessageId;
use domain::{DomainEvent, TransactionEvent};
use tokio::sync::RwLock;

use crate::error::PublishError;

/// Capability for handing events to downstream consumers.
///
/// Delivery is at-least-once: a message can be published again if the run
/// that published it fails to record the outcome. Consumers deduplicate on
/// `message_id`.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes a single event.
    async fn publish(
        &self,
        message_id: MessageId,
        event: &TransactionEvent,
    ) -> Result<(), PublishError>;
}

#[async_trait]
impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    async fn publish(
        &self,
        message_id: MessageId,
        event: &TransactionEvent,
    ) -> Result<(), PublishError> {
        (**self).publish(message_id, event).await
    }
}

/// Publisher that writes each event to the log.
///
/// The default publisher when no broker is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventPublisher;

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(
        &self,
        message_id: MessageId,
        event: &TransactionEvent,
    ) -> Result<(), PublishError> {
        let payload = event
            .to_payload()
            .map_err(|e| PublishError::Rejected(e.to_string()))?;

        tracing::info!(
            message_id = %message_id,
            transaction_id = %event.transaction_id(),
            event_type = event.event_type(),
            payload = %payload,
            "Event published"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PublisherState {
    published: Vec<(MessageId, TransactionEvent)>,
    failing_event_types: Vec<String>,
    latency: Option<Duration>,
}

/// In-memory publisher for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventPublisher {
    state: Arc<RwLock<PublisherState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryEventPublisher {
    /// Creates a new publisher that accepts every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every publish fail with `Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes publishing events of `event_type` fail with `Rejected`.
    pub async fn reject_event_type(&self, event_type: impl Into<String>) {
        self.state
            .write()
            .await
            .failing_event_types
            .push(event_type.into());
    }

    /// Makes every publish wait `latency` before answering.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.write().await.latency = Some(latency);
    }

    /// Returns every published event in publish order.
    pub async fn published(&self) -> Vec<(MessageId, TransactionEvent)> {
        self.state.read().await.published.clone()
    }

    /// Returns the number of published events.
    pub async fn published_count(&self) -> usize {
        self.state.read().await.published.len()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(
        &self,
        message_id: MessageId,
        event: &TransactionEvent,
    ) -> Result<(), PublishError> {
        let latency = self.state.read().await.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable("broker offline".to_string()));
        }

        let mut state = self.state.write().await;
        if state
            .failing_event_types
            .iter()
            .any(|t| t == event.event_type())
        {
            return Err(PublishError::Rejected(format!(
                "{} is not accepted",
                event.event_type()
            )));
        }
        state.published.push((message_id, event.clone()));
        Ok(())
    }
}
