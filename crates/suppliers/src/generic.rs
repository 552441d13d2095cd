//! Fallback for suppliers without an API: records the order for manual placement.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use orderflow_fulfillment::{
    OrderPayload, PlacementRequest, SupplierError, SupplierResult, SupplierType,
};

use crate::adapter::SupplierAdapter;

pub const MANUAL_REQUIRED: &str = "manual_required";

#[derive(Debug, Clone, Copy, Default)]
pub struct GenericAdapter;

impl GenericAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SupplierAdapter for GenericAdapter {
    fn supplier_type(&self) -> SupplierType {
        SupplierType::Generic
    }

    async fn place_order(&self, request: &PlacementRequest) -> Result<SupplierResult, SupplierError> {
        let payload = OrderPayload::from_value(&request.payload)?;
        let reference = request.supplier_reference(&payload);

        info!(
            queue_id = %request.queue_item_id,
            order_id = %request.order_id,
            requested_supplier = %request.supplier_type,
            "order recorded for manual placement"
        );

        Ok(SupplierResult::new(SupplierType::Generic, format!("MANUAL-{reference}"))
            .with_status(MANUAL_REQUIRED)
            .with_raw_response(json!({
                "requested_supplier": request.supplier_type,
                "order_details": {
                    "reference": reference,
                    "shipping": payload.shipping,
                    "items": payload.items,
                    "note": payload.note,
                },
            })))
    }
}
