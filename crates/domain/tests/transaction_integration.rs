//! Integration tests for the Transaction aggregate and service.
//!
//! These tests verify idempotent creation under concurrency, the outbox
//! written with each state change, and version-checked persistence.

use std::sync::Arc;

use common::TransactionId;
use domain::{
    CreateTransaction, Currency, DomainError, DomainEvent, InMemoryScheduler, MAX_ATTEMPTS, Money,
    Task, TransactionError, TransactionEvent, TransactionNumberGenerator, TransactionService,
    TransactionStatus,
};
use futures_util::future::join_all;
use payment_store::{InMemoryStore, OutboxStore, Version};

fn create_service() -> (
    Arc<TransactionService<InMemoryStore, InMemoryScheduler>>,
    InMemoryStore,
    InMemoryScheduler,
) {
    let store = InMemoryStore::new();
    let scheduler = InMemoryScheduler::new();
    let service = Arc::new(TransactionService::new(store.clone(), scheduler.clone()));
    (service, store, scheduler)
}

fn create_cmd(key: &str) -> CreateTransaction {
    CreateTransaction::new(
        key,
        Money::from_minor_units(4200).unwrap(),
        Currency::new("GBP").unwrap(),
        "customer-7",
        "order-7",
        "card_tok_mastercard",
    )
    .with_description("Integration test payment")
}

mod idempotent_creation {
    use super::*;

    #[tokio::test]
    async fn concurrent_requests_with_same_key_create_one_transaction() {
        let (service, store, scheduler) = create_service();

        let attempts = (0..16).map(|_| {
            let service = Arc::clone(&service);
            async move { service.create(create_cmd("shared-key")).await }
        });
        let results = join_all(attempts).await;

        let ids: Vec<TransactionId> = results
            .into_iter()
            .map(|result| result.unwrap().id())
            .collect();
        assert!(ids.iter().all(|id| *id == ids[0]));

        assert_eq!(store.transaction_count().await, 1);
        assert_eq!(store.message_count().await, 1);
        assert_eq!(
            scheduler.count(&Task::ProcessTransaction(ids[0])).await,
            1
        );
    }

    #[tokio::test]
    async fn concurrent_requests_across_tasks_create_one_transaction() {
        let (service, store, _) = create_service();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.create(create_cmd("spawned-key")).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id());
        }

        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.transaction_count().await, 1);
    }

    #[tokio::test]
    async fn distinct_keys_create_distinct_transactions() {
        let (service, store, _) = create_service();

        let a = service.create(create_cmd("key-a")).await.unwrap();
        let b = service.create(create_cmd("key-b")).await.unwrap();

        assert_ne!(a.id(), b.id());
        assert_ne!(a.transaction_number(), b.transaction_number());
        assert_eq!(store.transaction_count().await, 2);
    }

    #[tokio::test]
    async fn lookup_by_key_returns_the_created_transaction() {
        let (service, _, _) = create_service();
        let tx = service.create(create_cmd("lookup-key")).await.unwrap();

        let found = service
            .find_by_idempotency_key("lookup-key")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id(), tx.id());
        assert_eq!(found.description(), Some("Integration test payment"));
        assert!(
            service
                .find_by_idempotency_key("missing")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn custom_number_generator_is_used() {
        struct Fixed;
        impl TransactionNumberGenerator for Fixed {
            fn generate(&self, id: TransactionId, _: chrono::DateTime<chrono::Utc>) -> String {
                format!("FIXED-{id}")
            }
        }

        let service = TransactionService::new(InMemoryStore::new(), InMemoryScheduler::new())
            .with_number_generator(Arc::new(Fixed));
        let tx = service.create(create_cmd("numbered")).await.unwrap();

        assert_eq!(tx.transaction_number(), format!("FIXED-{}", tx.id()));
    }
}

mod outbox_records {
    use super::*;

    #[tokio::test]
    async fn created_event_payload_decodes_through_registry() {
        let (service, store, _) = create_service();
        let tx = service.create(create_cmd("payload-key")).await.unwrap();

        let messages = store.messages_for_transaction(tx.id()).await.unwrap();
        assert_eq!(messages.len(), 1);

        let event =
            TransactionEvent::decode(&messages[0].event_type, messages[0].payload.clone())
                .unwrap();
        assert_eq!(event.event_type(), "TransactionCreated");
        assert_eq!(event.transaction_id(), tx.id());
        match event {
            TransactionEvent::TransactionCreated(data) => {
                assert_eq!(data.amount.minor_units(), 4200);
                assert_eq!(data.currency.as_str(), "GBP");
                assert_eq!(data.idempotency_key, "payload-key");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_transition_writes_no_outbox_record() {
        let (service, store, _) = create_service();
        let tx = service.create(create_cmd("refund-key")).await.unwrap();

        let result = service
            .repository()
            .execute(tx.id(), |tx| {
                tx.initiate_refund()?;
                Ok(vec![])
            })
            .await;

        assert!(matches!(
            result,
            Err(DomainError::Transaction(
                TransactionError::InvalidStateTransition { .. }
            ))
        ));
        assert_eq!(store.message_count().await, 1);
    }
}

mod persisted_lifecycle {
    use super::*;

    #[tokio::test]
    async fn retry_cycle_is_persisted_with_increasing_versions() {
        let (service, _, _) = create_service();
        let tx = service.create(create_cmd("retry-key")).await.unwrap();
        let repo = service.repository();

        for attempt in 1..=MAX_ATTEMPTS {
            let mut current = repo.load_existing(tx.id()).await.unwrap();
            current.start_processing().unwrap();
            repo.save(&mut current, &[]).await.unwrap();

            current.mark_failed("timeout", None, true).unwrap();
            let events = if current.status() == TransactionStatus::Failed {
                vec![TransactionEvent::failed(&current)]
            } else {
                vec![]
            };
            repo.save(&mut current, &events).await.unwrap();

            assert_eq!(current.attempt_count(), attempt);
            assert_eq!(current.version(), Version::new(1 + 2 * attempt as i64));
        }

        let stored = repo.load_existing(tx.id()).await.unwrap();
        assert_eq!(stored.status(), TransactionStatus::Failed);
        assert!(stored.is_dead_letter());
        assert!(stored.completed_at().is_some());
    }

    #[tokio::test]
    async fn status_query_reflects_transitions() {
        let (service, _, _) = create_service();
        let a = service.create(create_cmd("status-a")).await.unwrap();
        service.create(create_cmd("status-b")).await.unwrap();
        service.cancel(a.id(), None).await.unwrap();

        let pending = service
            .find_by_status(TransactionStatus::Pending, 10)
            .await
            .unwrap();
        let cancelled = service
            .find_by_status(TransactionStatus::Cancelled, 10)
            .await
            .unwrap();

        assert_eq!(pending.len(), 1);
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].id(), a.id());
    }
}
