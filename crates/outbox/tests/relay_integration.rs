//! Integration tests for outbox delivery.
//!
//! Transactions are created through the domain service so the relay drains
//! exactly what a real write produces.

use std::time::Duration;

use domain::{
    CreateTransaction, Currency, DomainEvent, InMemoryScheduler, Money, Task, TransactionService,
};
use outbox::{InMemoryEventPublisher, OutboxRelay, RelayConfig};
use payment_store::{InMemoryStore, OutboxStore};

struct Harness {
    service: TransactionService<InMemoryStore, InMemoryScheduler>,
    relay: OutboxRelay<InMemoryStore, InMemoryEventPublisher, InMemoryScheduler>,
    store: InMemoryStore,
    publisher: InMemoryEventPublisher,
    scheduler: InMemoryScheduler,
}

fn harness() -> Harness {
    let store = InMemoryStore::new();
    let publisher = InMemoryEventPublisher::new();
    let scheduler = InMemoryScheduler::new();
    Harness {
        service: TransactionService::new(store.clone(), scheduler.clone()),
        relay: OutboxRelay::new(store.clone(), publisher.clone(), scheduler.clone()),
        store,
        publisher,
        scheduler,
    }
}

fn create_cmd(key: String) -> CreateTransaction {
    CreateTransaction::new(
        key,
        Money::from_minor_units(999).unwrap(),
        Currency::new("USD").unwrap(),
        "customer-1",
        "order-1",
        "card",
    )
}

async fn create_transactions(h: &Harness, count: usize) {
    for i in 0..count {
        h.service.create(create_cmd(format!("key-{i}"))).await.unwrap();
    }
    h.scheduler.take().await;
}

#[tokio::test]
async fn delivers_messages_in_creation_order() {
    let h = harness();
    create_transactions(&h, 3).await;

    let report = h.relay.deliver_pending().await.unwrap();

    assert_eq!(report.delivered, 3);
    assert_eq!(report.remaining, 0);
    assert!(!report.rescheduled);

    let published = h.publisher.published().await;
    let keys: Vec<_> = published
        .iter()
        .map(|(_, event)| match event {
            domain::TransactionEvent::TransactionCreated(data) => data.idempotency_key.clone(),
            other => panic!("unexpected event {}", other.event_type()),
        })
        .collect();
    assert_eq!(keys, vec!["key-0", "key-1", "key-2"]);
    assert_eq!(h.store.count_pending_messages(5).await.unwrap(), 0);
}

#[tokio::test]
async fn processed_messages_are_never_redelivered() {
    let h = harness();
    create_transactions(&h, 2).await;

    h.relay.deliver_pending().await.unwrap();
    let second = h.relay.deliver_pending().await.unwrap();

    assert_eq!(second.fetched, 0);
    assert_eq!(h.publisher.published_count().await, 2);
}

#[tokio::test]
async fn backlog_beyond_one_batch_reschedules_delivery() {
    let h = harness();
    create_transactions(&h, 25).await;

    let first = h.relay.deliver_pending().await.unwrap();
    assert_eq!(first.delivered, 20);
    assert_eq!(first.remaining, 5);
    assert!(first.rescheduled);
    assert_eq!(h.scheduler.count(&Task::DeliverOutbox).await, 1);

    let second = h.relay.deliver_pending().await.unwrap();
    assert_eq!(second.delivered, 5);
    assert_eq!(second.remaining, 0);
    assert!(!second.rescheduled);
    assert_eq!(h.scheduler.count(&Task::DeliverOutbox).await, 1);
    assert_eq!(h.publisher.published_count().await, 25);
}

#[tokio::test]
async fn publisher_outage_is_retried_until_recovery() {
    let h = harness();
    create_transactions(&h, 1).await;

    h.publisher.set_unavailable(true);
    let failed = h.relay.deliver_pending().await.unwrap();
    assert_eq!(failed.failed, 1);
    assert_eq!(failed.remaining, 1);

    let message = &h.store.all_messages().await[0];
    assert_eq!(message.delivery_attempts, 1);
    assert!(message.last_error.as_deref().unwrap().contains("unavailable"));

    h.publisher.set_unavailable(false);
    let recovered = h.relay.deliver_pending().await.unwrap();
    assert_eq!(recovered.delivered, 1);
    assert!(h.store.all_messages().await[0].is_processed());
}

#[tokio::test]
async fn exhausted_messages_stay_visible_but_are_skipped() {
    let h = harness();
    create_transactions(&h, 1).await;
    h.publisher.reject_event_type("TransactionCreated").await;

    for _ in 0..5 {
        h.relay.deliver_pending().await.unwrap();
    }
    let report = h.relay.deliver_pending().await.unwrap();

    assert_eq!(report.fetched, 0);
    assert_eq!(h.store.count_pending_messages(5).await.unwrap(), 0);

    let messages = h.store.all_messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].delivery_attempts, 5);
    assert!(messages[0].last_error.is_some());
}

#[tokio::test]
async fn one_failing_message_does_not_block_the_batch() {
    let h = harness();
    create_transactions(&h, 1).await;
    let tx = h.service.create(create_cmd("to-cancel".to_string())).await.unwrap();
    h.service.cancel(tx.id(), None).await.unwrap();
    h.publisher.reject_event_type("TransactionCancelled").await;

    let report = h.relay.deliver_pending().await.unwrap();

    assert_eq!(report.fetched, 3);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn smaller_batches_follow_configuration() {
    let store = InMemoryStore::new();
    let publisher = InMemoryEventPublisher::new();
    let scheduler = InMemoryScheduler::new();
    let service = TransactionService::new(store.clone(), scheduler.clone());
    let relay = OutboxRelay::with_config(
        store.clone(),
        publisher.clone(),
        scheduler.clone(),
        RelayConfig {
            batch_size: 2,
            max_delivery_attempts: 3,
        },
    );

    for i in 0..3 {
        service.create(create_cmd(format!("small-{i}"))).await.unwrap();
    }

    let report = relay.deliver_pending().await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.remaining, 1);
    assert!(report.rescheduled);
}

#[tokio::test]
async fn overlapping_runs_keep_delivered_messages_processed() {
    let h = harness();
    create_transactions(&h, 1).await;

    // A second relay over the same store whose publish fails slowly
    let failing = InMemoryEventPublisher::new();
    failing.set_latency(Duration::from_millis(50)).await;
    failing.set_unavailable(true);
    let slow_relay = OutboxRelay::new(h.store.clone(), failing, h.scheduler.clone());

    let (slow, fast) = tokio::join!(slow_relay.deliver_pending(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.relay.deliver_pending().await
    });

    assert_eq!(slow.unwrap().failed, 1);
    assert_eq!(fast.unwrap().delivered, 1);

    let message = h.store.all_messages().await.remove(0);
    assert!(message.is_processed());
    assert_eq!(message.delivery_attempts, 0);
    assert_eq!(h.store.count_pending_messages(5).await.unwrap(), 0);

    let next = h.relay.deliver_pending().await.unwrap();
    assert_eq!(next.fetched, 0);
    assert_eq!(h.publisher.published_count().await, 1);
}

#[tokio::test]
async fn overlapping_runs_on_one_relay_publish_once() {
    let h = harness();
    create_transactions(&h, 2).await;
    h.publisher.set_latency(Duration::from_millis(20)).await;

    let (first, second) = tokio::join!(h.relay.deliver_pending(), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.relay.deliver_pending().await
    });

    assert_eq!(first.unwrap().delivered, 2);
    assert_eq!(second.unwrap().fetched, 0);
    assert_eq!(h.publisher.published_count().await, 2);
}
