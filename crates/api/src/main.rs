//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::worker::Worker;
use api::{SharedProcessor, SharedScheduler};
use domain::{ChannelScheduler, Scheduler, Task};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::LoggingEventPublisher;
use payment_store::{InMemoryStore, OutboxStore, PostgresStore, TransactionStore};
use processing::{InMemoryPaymentProcessor, LoggingNotifier, OrchestratorConfig, ReconcilerConfig};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Wires the components over `store` and serves until shutdown.
async fn run<S>(store: S, config: Config, metrics_handle: PrometheusHandle)
where
    S: TransactionStore + OutboxStore + Clone + 'static,
{
    let (channel, tasks) = ChannelScheduler::new();
    let scheduler: SharedScheduler = Arc::new(channel);
    let processor: SharedProcessor = Arc::new(InMemoryPaymentProcessor::new());

    let state = api::create_state(
        store.clone(),
        scheduler.clone(),
        processor,
        OrchestratorConfig {
            processor_timeout: config.processor_timeout,
        },
    );

    let worker = Worker::new(
        store,
        scheduler.clone(),
        state.orchestrator.clone(),
        Arc::new(LoggingNotifier),
        Arc::new(LoggingEventPublisher),
        ReconcilerConfig {
            stuck_processing_timeout: config.stuck_processing_timeout,
            ..ReconcilerConfig::default()
        },
    )
    .with_concurrency(config.worker_concurrency);

    scheduler
        .schedule_recurring(Task::DeliverOutbox, &config.outbox_schedule)
        .await
        .expect("invalid OUTBOX_SCHEDULE");
    scheduler
        .schedule_recurring(Task::Reconcile, &config.reconcile_schedule)
        .await
        .expect("invalid RECONCILE_SCHEDULE");

    let (stop_worker, worker_stopped) = tokio::sync::oneshot::channel::<()>();
    let worker_handle = tokio::spawn(Arc::new(worker).run(tasks, async {
        let _ = worker_stopped.await;
    }));

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = stop_worker.send(());
    if let Err(err) = worker_handle.await {
        tracing::error!(error = %err, "task worker panicked");
    }

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the store and serve
    match config.database_url.clone() {
        Some(url) => {
            let store = PostgresStore::connect(&url)
                .await
                .expect("failed to connect to database");
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL store");
            run(store, config, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            run(InMemoryStore::new(), config, metrics_handle).await;
        }
    }
}
