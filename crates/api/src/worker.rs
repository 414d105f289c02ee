//! Worker runtime for scheduled tasks.
//!
//! Drains the channel fed by [`ChannelScheduler`](domain::ChannelScheduler)
//! and runs each task on its own tokio task, with a semaphore bounding how
//! many run at once. Task failures are logged and counted here; nothing
//! upstream waits on them.

use std::sync::Arc;

use domain::Task;
use outbox::{EventPublisher, OutboxError, OutboxRelay};
use payment_store::{OutboxStore, TransactionStore};
use processing::{
    DeadLetterHandler, Notifier, ProcessingError, ProcessingOrchestrator, Reconciler,
    ReconcilerConfig,
};
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};

use crate::{SharedProcessor, SharedScheduler};

/// Error returned by a single task run.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

/// Runs scheduled tasks against the processing and outbox components.
pub struct Worker<S: TransactionStore + OutboxStore> {
    orchestrator: Arc<ProcessingOrchestrator<S, SharedProcessor, SharedScheduler>>,
    dead_letters: DeadLetterHandler<S, Arc<dyn Notifier>>,
    relay: OutboxRelay<S, Arc<dyn EventPublisher>, SharedScheduler>,
    reconciler: Reconciler<S, SharedScheduler>,
    concurrency: usize,
}

impl<S> Worker<S>
where
    S: TransactionStore + OutboxStore + Clone + 'static,
{
    /// Creates a worker. `orchestrator` is shared with the HTTP handlers.
    pub fn new(
        store: S,
        scheduler: SharedScheduler,
        orchestrator: Arc<ProcessingOrchestrator<S, SharedProcessor, SharedScheduler>>,
        notifier: Arc<dyn Notifier>,
        publisher: Arc<dyn EventPublisher>,
        reconciler_config: ReconcilerConfig,
    ) -> Self {
        Self {
            orchestrator,
            dead_letters: DeadLetterHandler::new(store.clone(), notifier),
            relay: OutboxRelay::new(store.clone(), publisher, scheduler.clone()),
            reconciler: Reconciler::with_config(store, scheduler, reconciler_config),
            concurrency: 16,
        }
    }

    /// Sets how many tasks may run at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Runs tasks from `tasks` until the channel closes or `shutdown`
    /// completes, then waits for in-flight tasks to finish.
    pub async fn run(
        self: Arc<Self>,
        mut tasks: mpsc::UnboundedReceiver<Task>,
        shutdown: impl Future<Output = ()>,
    ) {
        tracing::info!(concurrency = self.concurrency, "Starting task worker");

        let permits = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        let semaphore = Arc::new(Semaphore::new(permits as usize));
        tokio::pin!(shutdown);

        loop {
            let task = tokio::select! {
                task = tasks.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
                () = &mut shutdown => break,
            };

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                tracing::error!("Task semaphore closed");
                break;
            };

            let worker = self.clone();
            tokio::spawn(async move {
                worker.dispatch(task).await;
                drop(permit);
            });
        }

        tracing::info!("Task worker stopping, waiting for in-flight tasks");
        if semaphore.acquire_many(permits).await.is_err() {
            tracing::warn!("Task semaphore closed while draining");
        }
    }

    /// Runs one task and records its failure, if any.
    pub async fn dispatch(&self, task: Task) {
        let name = task.name();
        if let Err(err) = self.run_task(task.clone()).await {
            metrics::counter!("scheduled_task_failures_total", "task" => name).increment(1);
            tracing::error!(task = %task, error = %err, "Scheduled task failed");
        }
    }

    /// Runs one task.
    pub async fn run_task(&self, task: Task) -> Result<(), TaskError> {
        match task {
            Task::ProcessTransaction(id) => {
                let outcome = self.orchestrator.process(id).await?;
                tracing::debug!(transaction_id = %id, ?outcome, "Processing task finished");
            }
            Task::HandleDeadLetter(id) => {
                self.dead_letters.handle(id).await?;
            }
            Task::DeliverOutbox => {
                self.relay.deliver_pending().await?;
            }
            Task::Reconcile => {
                self.reconciler.reconcile().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use domain::{
        ChannelScheduler, CreateTransaction, Currency, InMemoryScheduler, Money,
        TransactionService, TransactionStatus,
    };
    use outbox::InMemoryEventPublisher;
    use payment_store::InMemoryStore;
    use processing::{
        InMemoryNotifier, InMemoryPaymentProcessor, OrchestratorConfig, ProcessorError,
    };

    struct Fixture {
        worker: Arc<Worker<InMemoryStore>>,
        service: TransactionService<InMemoryStore, SharedScheduler>,
        store: InMemoryStore,
        processor: InMemoryPaymentProcessor,
        notifier: InMemoryNotifier,
        publisher: InMemoryEventPublisher,
    }

    fn fixture(scheduler: SharedScheduler) -> Fixture {
        let store = InMemoryStore::new();
        let processor = InMemoryPaymentProcessor::new();
        let notifier = InMemoryNotifier::new();
        let publisher = InMemoryEventPublisher::new();
        let orchestrator = Arc::new(ProcessingOrchestrator::with_config(
            store.clone(),
            Arc::new(processor.clone()) as SharedProcessor,
            scheduler.clone(),
            OrchestratorConfig::default(),
        ));
        let worker = Worker::new(
            store.clone(),
            scheduler.clone(),
            orchestrator,
            Arc::new(notifier.clone()),
            Arc::new(publisher.clone()),
            ReconcilerConfig::default(),
        )
        .with_concurrency(4);

        Fixture {
            worker: Arc::new(worker),
            service: TransactionService::new(store.clone(), scheduler),
            store,
            processor,
            notifier,
            publisher,
        }
    }

    fn create_cmd(key: &str) -> CreateTransaction {
        CreateTransaction::new(
            key,
            Money::from_minor_units(2500).unwrap(),
            Currency::new("USD").unwrap(),
            "customer-1",
            "order-1",
            "card",
        )
    }

    #[tokio::test]
    async fn test_run_task_routes_each_task() {
        let f = fixture(Arc::new(InMemoryScheduler::new()));
        let id = f.service.create(create_cmd("route")).await.unwrap().id();

        f.worker
            .run_task(Task::ProcessTransaction(id))
            .await
            .unwrap();
        f.worker.run_task(Task::DeliverOutbox).await.unwrap();
        f.worker.run_task(Task::Reconcile).await.unwrap();
        f.worker.run_task(Task::HandleDeadLetter(id)).await.unwrap();

        let tx = f.service.get(id).await.unwrap().unwrap();
        assert_eq!(tx.status(), TransactionStatus::Completed);
        assert_eq!(f.publisher.published_count().await, 2);
        assert_eq!(f.notifier.entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unexpected_fault_surfaces_as_task_error() {
        let f = fixture(Arc::new(InMemoryScheduler::new()));
        f.processor
            .push_payment_outcome(Err(ProcessorError::unexpected("reset by peer")))
            .await;
        let id = f.service.create(create_cmd("fault")).await.unwrap().id();

        let result = f.worker.run_task(Task::ProcessTransaction(id)).await;
        assert!(matches!(
            result,
            Err(TaskError::Processing(ProcessingError::UnexpectedFault { .. }))
        ));

        // dispatch swallows the error after recording it
        f.worker.dispatch(Task::ProcessTransaction(id)).await;
    }

    #[tokio::test]
    async fn test_run_drains_channel_until_shutdown() {
        let (scheduler, receiver) = ChannelScheduler::new();
        let f = fixture(Arc::new(scheduler));
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let worker = f.worker.clone();
        let handle = tokio::spawn(async move {
            worker
                .run(receiver, async {
                    let _ = stop_rx.await;
                })
                .await;
        });

        let id = f.service.create(create_cmd("channel")).await.unwrap().id();

        let mut status = TransactionStatus::Pending;
        for _ in 0..100 {
            status = f.service.get(id).await.unwrap().unwrap().status();
            if status == TransactionStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, TransactionStatus::Completed);
        assert_eq!(f.processor.payment_call_count().await, 1);
        assert_eq!(f.store.message_count().await, 2);

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
