//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use domain::TransactionStatus;
use payment_store::TransactionStore;
use serde::Serialize;

use super::transactions::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub store: &'static str,
}

/// GET /health: reports whether the transaction store answers queries.
///
/// Returns 503 while the store is unreachable so load balancers stop routing
/// payment traffic to this instance.
pub async fn check<S: TransactionStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> (StatusCode, Json<HealthResponse>) {
    let version = env!("CARGO_PKG_VERSION");

    match state
        .service
        .find_by_status(TransactionStatus::Processing, 1)
        .await
    {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                version,
                store: "ok",
            }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "Health check could not reach the store");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    version,
                    store: "unavailable",
                }),
            )
        }
    }
}
