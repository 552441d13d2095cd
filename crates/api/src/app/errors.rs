use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use orderflow_infra::{DispatchError, QueueError, QueueStoreError};

pub fn queue_error_to_response(err: QueueError) -> Response {
    match err {
        QueueError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        QueueError::NotCancellable { .. } => {
            json_error(StatusCode::CONFLICT, "not_cancellable", err.to_string())
        }
        QueueError::NotRetryable { .. } => {
            json_error(StatusCode::CONFLICT, "not_retryable", err.to_string())
        }
        QueueError::AlreadyQueued { queue_id, .. } => already_queued(queue_id.to_string()),
        QueueError::Validation(e) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
        }
        QueueError::Store(e) => store_error_to_response(e),
        QueueError::EventLog(e) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "event_log_error", e.to_string())
        }
    }
}

pub fn dispatch_error_to_response(err: DispatchError) -> Response {
    match err {
        DispatchError::Store(e) => store_error_to_response(e),
        DispatchError::Transition { .. } => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "dispatch_error",
            err.to_string(),
        ),
    }
}

fn store_error_to_response(err: QueueStoreError) -> Response {
    match err {
        QueueStoreError::Unavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg)
        }
        QueueStoreError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        other => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            other.to_string(),
        ),
    }
}

/// The shape callers of the enqueue endpoint rely on for duplicates.
pub fn already_queued(queue_id: String) -> Response {
    (
        StatusCode::CONFLICT,
        axum::Json(json!({
            "success": false,
            "error": "already queued",
            "queue_id": queue_id,
        })),
    )
        .into_response()
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
