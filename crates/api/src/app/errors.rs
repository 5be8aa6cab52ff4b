use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::{Map, Value, json};

use stockledger_infra::store::StoreError;
use stockledger_inventory::LedgerError;

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    let status = status_for(&err);
    let message = err.to_string();
    let (code, context) = match err {
        LedgerError::StockInsufficient {
            key,
            requested,
            available,
        } => (
            "stock_insufficient",
            json!({ "stock_key": key, "requested": requested, "available": available }),
        ),
        LedgerError::ReservationExceedsStock {
            key,
            reserved,
            quantity,
        } => (
            "reservation_exceeds_stock",
            json!({ "stock_key": key, "reserved": reserved, "quantity": quantity }),
        ),
        LedgerError::InvalidReservationState(_) => ("invalid_reservation_state", Value::Null),
        LedgerError::Validation(_) => ("validation_error", Value::Null),
        LedgerError::BatchNotRevertible { batch_id, .. } => {
            ("batch_not_revertible", json!({ "batch_id": batch_id }))
        }
        LedgerError::InvalidBatchState(_) => ("invalid_batch_state", Value::Null),
        LedgerError::BatchNotFound(batch_id) => ("batch_not_found", json!({ "batch_id": batch_id })),
        LedgerError::LockTimeout { resource } => {
            ("lock_timeout", json!({ "resource": resource, "retryable": true }))
        }
        LedgerError::BatchCommitFailed { line, source } => (
            "batch_commit_failed",
            json!({ "line": line, "cause": cause_code(source.root_cause()), "retryable": source.is_retryable() }),
        ),
        LedgerError::ReversalBlocked {
            batch_id,
            key,
            source,
        } => (
            "reversal_blocked",
            json!({ "batch_id": batch_id, "stock_key": key, "cause": cause_code(source.root_cause()) }),
        ),
        LedgerError::Store(_) => ("store_error", Value::Null),
    };

    if status.is_server_error() {
        tracing::error!(error = %message, "ledger request failed");
    }
    json_error_with(status, code, message, context)
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    ledger_error_to_response(err.into())
}

/// HTTP status for a ledger error. Wrapped errors take the status of their cause.
pub fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::StockInsufficient { .. }
        | LedgerError::ReservationExceedsStock { .. }
        | LedgerError::InvalidReservationState(_)
        | LedgerError::InvalidBatchState(_) => StatusCode::CONFLICT,
        LedgerError::LockTimeout { .. } => StatusCode::LOCKED,
        LedgerError::BatchNotRevertible { .. } => StatusCode::FORBIDDEN,
        LedgerError::BatchNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::BatchCommitFailed { source, .. } | LedgerError::ReversalBlocked { source, .. } => {
            status_for(source)
        }
        LedgerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn cause_code(err: &LedgerError) -> &'static str {
    match err {
        LedgerError::StockInsufficient { .. } => "stock_insufficient",
        LedgerError::ReservationExceedsStock { .. } => "reservation_exceeds_stock",
        LedgerError::InvalidReservationState(_) => "invalid_reservation_state",
        LedgerError::Validation(_) => "validation_error",
        LedgerError::BatchNotRevertible { .. } => "batch_not_revertible",
        LedgerError::InvalidBatchState(_) => "invalid_batch_state",
        LedgerError::BatchNotFound(_) => "batch_not_found",
        LedgerError::LockTimeout { .. } => "lock_timeout",
        LedgerError::BatchCommitFailed { .. } => "batch_commit_failed",
        LedgerError::ReversalBlocked { .. } => "reversal_blocked",
        LedgerError::Store(_) => "store_error",
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    json_error_with(status, code, message, Value::Null)
}

/// Like [`json_error`], with the fields of `context` merged into the body.
pub fn json_error_with(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    context: Value,
) -> axum::response::Response {
    let mut body = Map::new();
    body.insert("error".to_string(), Value::from(code));
    body.insert("message".to_string(), Value::from(message.into()));
    if let Value::Object(fields) = context {
        body.extend(fields);
    }
    (status, axum::Json(Value::Object(body))).into_response()
}
