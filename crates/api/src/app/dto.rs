use axum::http::StatusCode;
use axum::response::Response;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use orderflow_core::{OrderId, QueueItemId};
use orderflow_fulfillment::SupplierType;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct EnqueueBody {
    pub order_id: String,
    pub supplier_type: String,
    #[serde(default)]
    pub payload: JsonValue,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub order_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessBody {
    pub batch_size: Option<usize>,
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_queue_id(raw: &str) -> Result<QueueItemId, Response> {
    raw.parse()
        .map_err(|e: orderflow_core::DomainError| {
            errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string())
        })
}

pub fn parse_order_id(raw: String) -> Result<OrderId, Response> {
    OrderId::new(raw)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_order_id", e.to_string()))
}

pub fn parse_supplier_type(raw: &str) -> Result<SupplierType, Response> {
    raw.parse().map_err(|e: orderflow_core::DomainError| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_supplier_type", e.to_string())
    })
}
