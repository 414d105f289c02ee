//! Outbox relay: delivers pending outbox messages to the event publisher.

use domain::{Scheduler, Task, TransactionEvent};
use payment_store::{OutboxMessage, OutboxStore};
use tokio::sync::Mutex;

use crate::Result;
use crate::publisher::EventPublisher;

/// Settings for an outbox relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Maximum messages delivered per run.
    pub batch_size: usize,

    /// Failed attempts after which a message is no longer selected.
    pub max_delivery_attempts: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            max_delivery_attempts: 5,
        }
    }
}

/// Outcome of a single delivery run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Messages fetched for this run.
    pub fetched: usize,

    /// Messages published and marked processed.
    pub delivered: usize,

    /// Messages whose attempt failed.
    pub failed: usize,

    /// Messages that reached the attempt cap during this run.
    pub exhausted: usize,

    /// Eligible messages still pending after the run.
    pub remaining: u64,

    /// Whether another run was enqueued to drain the backlog.
    pub rescheduled: bool,
}

/// Delivers pending outbox messages, oldest first.
///
/// Each run handles at most one batch. A message is marked processed once
/// published; a failed publish or an undecodable message counts as a failed
/// attempt. Messages that reach the attempt cap stay in the store but are no
/// longer selected. If eligible messages remain after a run, another run is
/// enqueued straight away instead of waiting for the next tick.
///
/// Runs on one relay never overlap: a run that starts while another is in
/// progress returns an empty report. Runs on separate relays may overlap;
/// the store keeps a processed message processed.
pub struct OutboxRelay<S: OutboxStore, P: EventPublisher, Sc: Scheduler> {
    store: S,
    publisher: P,
    scheduler: Sc,
    config: RelayConfig,
    running: Mutex<()>,
}

impl<S: OutboxStore, P: EventPublisher, Sc: Scheduler> OutboxRelay<S, P, Sc> {
    /// Creates a new relay with default settings.
    pub fn new(store: S, publisher: P, scheduler: Sc) -> Self {
        Self::with_config(store, publisher, scheduler, RelayConfig::default())
    }

    /// Creates a new relay with the given settings.
    pub fn with_config(store: S, publisher: P, scheduler: Sc, config: RelayConfig) -> Self {
        Self {
            store,
            publisher,
            scheduler,
            config,
            running: Mutex::new(()),
        }
    }

    /// Returns the relay settings.
    pub fn config(&self) -> RelayConfig {
        self.config
    }

    /// Delivers one batch of pending messages.
    #[tracing::instrument(skip(self))]
    pub async fn deliver_pending(&self) -> Result<DeliveryReport> {
        let Ok(_running) = self.running.try_lock() else {
            tracing::debug!("Outbox delivery already running, skipping");
            return Ok(DeliveryReport::default());
        };

        let mut batch = self
            .store
            .fetch_pending_messages(self.config.batch_size, self.config.max_delivery_attempts)
            .await?;

        let mut report = DeliveryReport {
            fetched: batch.len(),
            ..DeliveryReport::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        for message in &mut batch {
            match self.deliver(message).await {
                Ok(()) => {
                    message.mark_as_processed();
                    report.delivered += 1;
                    metrics::counter!("outbox_messages_delivered_total").increment(1);
                }
                Err(error) => {
                    message.record_failure(&error);
                    report.failed += 1;
                    metrics::counter!("outbox_delivery_failures_total").increment(1);

                    if message.delivery_attempts >= self.config.max_delivery_attempts {
                        report.exhausted += 1;
                        tracing::error!(
                            message_id = %message.id,
                            transaction_id = %message.aggregate_id,
                            event_type = %message.event_type,
                            attempts = message.delivery_attempts,
                            error = %error,
                            "Outbox message abandoned after max delivery attempts"
                        );
                    } else {
                        tracing::warn!(
                            message_id = %message.id,
                            event_type = %message.event_type,
                            attempts = message.delivery_attempts,
                            error = %error,
                            "Outbox delivery failed"
                        );
                    }
                }
            }
        }

        self.store.save_messages(batch).await?;

        report.remaining = self
            .store
            .count_pending_messages(self.config.max_delivery_attempts)
            .await?;
        if report.remaining > 0 {
            match self.scheduler.enqueue(Task::DeliverOutbox).await {
                Ok(()) => report.rescheduled = true,
                Err(err) => tracing::warn!(
                    remaining = report.remaining,
                    error = %err,
                    "Failed to enqueue follow-up outbox delivery"
                ),
            }
        }

        tracing::info!(
            delivered = report.delivered,
            failed = report.failed,
            remaining = report.remaining,
            "Outbox delivery run complete"
        );

        Ok(report)
    }

    /// Decodes and publishes a single message, returning the failure text.
    async fn deliver(&self, message: &OutboxMessage) -> std::result::Result<(), String> {
        let event = TransactionEvent::decode(&message.event_type, message.payload.clone())
            .map_err(|e| e.to_string())?;

        self.publisher
            .publish(message.id, &event)
            .await
            .map_err(|e| e.to_string())
    }
}
