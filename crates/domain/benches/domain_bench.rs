use chrono::Utc;
use common::TransactionId;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    CreateTransaction, Currency, InMemoryScheduler, Money, Transaction, TransactionEvent,
    TransactionService,
};
use payment_store::InMemoryStore;

fn create_cmd(key: String) -> CreateTransaction {
    CreateTransaction::new(
        key,
        Money::from_minor_units(1500).unwrap(),
        Currency::new("USD").unwrap(),
        "customer-bench",
        "order-bench",
        "card_tok_visa",
    )
}

fn bench_state_transitions(c: &mut Criterion) {
    let cmd = create_cmd("bench-key".to_string());

    c.bench_function("domain/retry_until_dead_letter", |b| {
        b.iter(|| {
            let mut tx =
                Transaction::create(TransactionId::new(), "TXN-BENCH", Utc::now(), &cmd).unwrap();
            while !tx.is_terminal() {
                tx.start_processing().unwrap();
                tx.mark_failed("gateway timeout", None, true).unwrap();
            }
            tx
        });
    });
}

fn bench_event_registry(c: &mut Criterion) {
    let cmd = create_cmd("bench-key".to_string());
    let tx = Transaction::create(TransactionId::new(), "TXN-BENCH", Utc::now(), &cmd).unwrap();
    let event = TransactionEvent::created(&tx);
    let payload = event.to_payload().unwrap();

    c.bench_function("domain/decode_created_event", |b| {
        b.iter(|| TransactionEvent::decode("TransactionCreated", payload.clone()).unwrap());
    });
}

fn bench_create_transaction(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = TransactionService::new(InMemoryStore::new(), InMemoryScheduler::new());
    let mut counter = 0u64;

    c.bench_function("domain/create_transaction", |b| {
        b.iter(|| {
            counter += 1;
            let cmd = create_cmd(format!("bench-{counter}"));
            rt.block_on(async { service.create(cmd).await.unwrap() });
        });
    });
}

fn bench_idempotent_replay(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = TransactionService::new(InMemoryStore::new(), InMemoryScheduler::new());
    rt.block_on(async {
        service
            .create(create_cmd("replayed".to_string()))
            .await
            .unwrap()
    });

    c.bench_function("domain/idempotent_replay", |b| {
        b.iter(|| {
            rt.block_on(async {
                service
                    .create(create_cmd("replayed".to_string()))
                    .await
                    .unwrap()
            });
        });
    });
}

criterion_group!(
    benches,
    bench_state_transitions,
    bench_event_registry,
    bench_create_transaction,
    bench_idempotent_replay,
);
criterion_main!(benches);
