//! HTTP API server and task worker for the payment processing system.
//!
//! Provides REST endpoints for creating, inspecting, refunding and
//! cancelling transactions, a worker that runs scheduled tasks, and
//! observability through structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod worker;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::{Scheduler, TransactionService};
use metrics_exporter_prometheus::PrometheusHandle;
use payment_store::TransactionStore;
use processing::{OrchestratorConfig, PaymentProcessor, ProcessingOrchestrator};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::transactions::AppState;

/// Scheduler shared by the HTTP handlers and the worker.
pub type SharedScheduler = Arc<dyn Scheduler>;

/// Payment processor shared by the HTTP handlers and the worker.
pub type SharedProcessor = Arc<dyn PaymentProcessor>;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: TransactionStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/transactions", post(routes::transactions::create::<S>))
        .route("/transactions/{id}", get(routes::transactions::get::<S>))
        .route(
            "/transactions/{id}/refund",
            post(routes::transactions::refund::<S>),
        )
        .route(
            "/transactions/{id}/cancel",
            post(routes::transactions::cancel::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state over a store, scheduler and processor.
pub fn create_state<S: TransactionStore + Clone + 'static>(
    store: S,
    scheduler: SharedScheduler,
    processor: SharedProcessor,
    orchestrator_config: OrchestratorConfig,
) -> Arc<AppState<S>> {
    let service = TransactionService::new(store.clone(), scheduler.clone());
    let orchestrator = Arc::new(ProcessingOrchestrator::with_config(
        store,
        processor,
        scheduler,
        orchestrator_config,
    ));

    Arc::new(AppState {
        service,
        orchestrator,
    })
}
