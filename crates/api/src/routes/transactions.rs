//! Transaction endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::TransactionId;
use domain::{CreateTransaction, Currency, Money, Transaction, TransactionService};
use payment_store::TransactionStore;
use processing::ProcessingOrchestrator;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::{SharedProcessor, SharedScheduler};

/// Shared application state accessible from all handlers.
pub struct AppState<S: TransactionStore> {
    pub service: TransactionService<S, SharedScheduler>,
    pub orchestrator: Arc<ProcessingOrchestrator<S, SharedProcessor, SharedScheduler>>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateTransactionRequest {
    pub idempotency_key: String,
    pub amount: Decimal,
    pub currency: String,
    pub customer_id: String,
    pub order_id: String,
    pub payment_method: String,
    pub description: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct TransactionCreatedResponse {
    pub id: TransactionId,
    pub transaction_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct TransactionResponse {
    pub id: TransactionId,
    pub transaction_number: String,
    pub idempotency_key: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub attempt_count: u32,
    pub customer_id: String,
    pub order_id: String,
    pub payment_method: String,
    pub description: Option<String>,
    pub processor_transaction_id: Option<String>,
    pub processor_response_code: Option<String>,
    pub processor_refund_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Transaction> for TransactionCreatedResponse {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id(),
            transaction_number: tx.transaction_number().to_string(),
            amount: tx.amount().to_decimal(),
            currency: tx.currency().to_string(),
            status: tx.status().to_string(),
            created_at: tx.created_at(),
        }
    }
}

impl From<&Transaction> for TransactionResponse {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id(),
            transaction_number: tx.transaction_number().to_string(),
            idempotency_key: tx.idempotency_key().to_string(),
            amount: tx.amount().to_decimal(),
            currency: tx.currency().to_string(),
            status: tx.status().to_string(),
            attempt_count: tx.attempt_count(),
            customer_id: tx.customer_id().to_string(),
            order_id: tx.order_id().to_string(),
            payment_method: tx.payment_method().to_string(),
            description: tx.description().map(String::from),
            processor_transaction_id: tx.processor_transaction_id().map(String::from),
            processor_response_code: tx.processor_response_code().map(String::from),
            processor_refund_id: tx.processor_refund_id().map(String::from),
            failure_reason: tx.failure_reason().map(String::from),
            created_at: tx.created_at(),
            updated_at: tx.updated_at(),
            completed_at: tx.completed_at(),
        }
    }
}

// -- Handlers --

/// POST /transactions: create a transaction, or return the one already
/// holding the idempotency key.
#[tracing::instrument(skip(state, req), fields(idempotency_key = %req.idempotency_key))]
pub async fn create<S: TransactionStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateTransactionRequest>,
) -> Result<(StatusCode, Json<TransactionCreatedResponse>), ApiError> {
    let amount = Money::from_decimal(req.amount)?;
    let currency = Currency::new(&req.currency)?;

    let mut cmd = CreateTransaction::new(
        req.idempotency_key,
        amount,
        currency,
        req.customer_id,
        req.order_id,
        req.payment_method,
    );
    if let Some(description) = req.description {
        cmd = cmd.with_description(description);
    }

    let tx = state.service.create(cmd).await?;
    Ok((StatusCode::CREATED, Json(TransactionCreatedResponse::from(&tx))))
}

/// GET /transactions/{id}: load a transaction by ID.
#[tracing::instrument(skip(state))]
pub async fn get<S: TransactionStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let transaction_id = parse_transaction_id(&id)?;
    let tx = state
        .service
        .get(transaction_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Transaction {id} not found")))?;

    Ok(Json(TransactionResponse::from(&tx)))
}

/// POST /transactions/{id}/refund: refund a completed transaction.
#[tracing::instrument(skip(state))]
pub async fn refund<S: TransactionStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let transaction_id = parse_transaction_id(&id)?;
    let tx = state.orchestrator.refund(transaction_id).await?;
    Ok(Json(TransactionResponse::from(&tx)))
}

/// POST /transactions/{id}/cancel: cancel a transaction that has not
/// reached a terminal status. The body `{"reason": ...}` is optional.
#[tracing::instrument(skip(state, body))]
pub async fn cancel<S: TransactionStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<TransactionResponse>, ApiError> {
    let transaction_id = parse_transaction_id(&id)?;
    let req: CancelRequest = if body.is_empty() {
        CancelRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid cancel request: {e}")))?
    };

    let tx = state.service.cancel(transaction_id, req.reason).await?;
    Ok(Json(TransactionResponse::from(&tx)))
}

fn parse_transaction_id(id: &str) -> Result<TransactionId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
