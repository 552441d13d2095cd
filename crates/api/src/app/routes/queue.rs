use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;

use orderflow_infra::{EnqueueOutcome, EnqueueRequest};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::OwnerContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(enqueue).get(status))
        .route("/:id", get(get_item))
        .route("/:id/cancel", post(cancel))
        .route("/:id/retry", post(retry))
        .route("/:id/events", get(events))
}

pub async fn enqueue(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Json(body): Json<dto::EnqueueBody>,
) -> Response {
    let order_id = match dto::parse_order_id(body.order_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let supplier_type = match dto::parse_supplier_type(&body.supplier_type) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let request = EnqueueRequest {
        order_id,
        owner_id: owner.owner_id(),
        supplier_type,
        payload: body.payload,
        max_attempts: body.max_attempts,
    };

    match services.queue.enqueue(request).await {
        Ok(EnqueueOutcome::Queued(item)) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "queue_id": item.id.to_string(),
            })),
        )
            .into_response(),
        Ok(EnqueueOutcome::Duplicate(existing)) => errors::already_queued(existing.id.to_string()),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Query(query): Query<dto::StatusQuery>,
) -> Response {
    let order_id = match query.order_id {
        Some(raw) => match dto::parse_order_id(raw) {
            Ok(id) => Some(id),
            Err(resp) => return resp,
        },
        None => None,
    };

    match services.queue.get_status(owner.owner_id(), order_id).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn get_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> Response {
    let id = match dto::parse_queue_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.queue.get(id, owner.owner_id()).await {
        Ok(item) => Json(item).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn cancel(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> Response {
    let id = match dto::parse_queue_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.queue.cancel(id, owner.owner_id()).await {
        Ok(item) => Json(item).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn retry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> Response {
    let id = match dto::parse_queue_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.queue.retry_now(id, owner.owner_id()).await {
        Ok(item) => Json(item).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn events(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> Response {
    let id = match dto::parse_queue_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.queue.history(id, owner.owner_id()).await {
        Ok(entries) => Json(json!({ "items": entries })).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}
