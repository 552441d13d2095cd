use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    response::{IntoResponse, Response},
    routing::post,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/process", post(process_queue))
}

/// Run one dispatch cycle now. Safe to call concurrently with the
/// background loop or other callers.
pub async fn process_queue(
    Extension(services): Extension<Arc<AppServices>>,
    body: Option<Json<dto::ProcessBody>>,
) -> Response {
    let batch_size = body.and_then(|Json(b)| b.batch_size);
    match services.dispatcher.process_queue(batch_size).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
