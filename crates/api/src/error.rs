//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, MoneyError, TransactionError};
use processing::ProcessingError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Domain logic error.
    Domain(DomainError),
    /// Processing error (refunds).
    Processing(ProcessingError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Processing(err) => processing_error_to_response(err),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    let status = match &err {
        DomainError::Transaction(TransactionError::InvalidStateTransition { .. }) => {
            StatusCode::CONFLICT
        }
        DomainError::TransactionNotFound(_) => StatusCode::NOT_FOUND,
        _ if err.is_conflict() => StatusCode::CONFLICT,
        _ if err.is_validation() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn processing_error_to_response(err: ProcessingError) -> (StatusCode, String) {
    match err {
        ProcessingError::Domain(err) => domain_error_to_response(err),
        ProcessingError::RefundFailed { .. } => (StatusCode::BAD_GATEWAY, err.to_string()),
        ProcessingError::RefundInProgress(_) => (StatusCode::CONFLICT, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<ProcessingError> for ApiError {
    fn from(err: ProcessingError) -> Self {
        ApiError::Processing(err)
    }
}

impl From<MoneyError> for ApiError {
    fn from(err: MoneyError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::TransactionId;
    use domain::TransactionStatus;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_illegal_transition_is_conflict() {
        let err = DomainError::Transaction(TransactionError::InvalidStateTransition {
            current_state: TransactionStatus::Completed,
            action: "cancel",
        });
        assert_eq!(status_of(err.into()), StatusCode::CONFLICT);
    }

    #[test]
    fn test_validation_is_bad_request() {
        let err = DomainError::Transaction(TransactionError::InvalidAmount { minor_units: 0 });
        assert_eq!(status_of(err.into()), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(MoneyError::InvalidCurrency("US".to_string()).into()),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_refund_in_progress_is_conflict() {
        let err = ProcessingError::RefundInProgress(TransactionId::new());
        assert_eq!(status_of(err.into()), StatusCode::CONFLICT);
    }

    #[test]
    fn test_missing_transaction_is_not_found() {
        let err = ProcessingError::Domain(DomainError::TransactionNotFound(TransactionId::new()));
        assert_eq!(status_of(err.into()), StatusCode::NOT_FOUND);
    }
}
