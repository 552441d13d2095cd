use axum::Router;
use serde_json::{Value as JsonValue, json};
use tokio::net::TcpListener;

use orderflow_core::{OrderId, OwnerId, QueueItemId};
use orderflow_fulfillment::{PlacementRequest, SupplierType};

/// Supplier API stand-in listening on an ephemeral port.
pub(crate) struct FakeSupplier {
    pub base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl FakeSupplier {
    pub async fn spawn(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Self {
            base_url: format!("http://{addr}"),
            handle,
        }
    }
}

impl Drop for FakeSupplier {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub(crate) fn order_payload() -> JsonValue {
    json!({
        "order_number": "1042",
        "shipping": {
            "first_name": "Ada",
            "last_name": "Lovelace",
            "address1": "12 Analytical Row",
            "city": "London",
            "province": "Greater London",
            "zip": "N1 9GU",
            "country_code": "GB",
            "phone": "+44 20 7946 0000",
            "email": "ada@example.com"
        },
        "items": [{ "sku": "SKU-1", "variant_id": "VID-1", "quantity": 2 }],
        "note": "gift wrap"
    })
}

pub(crate) fn placement_request(supplier: SupplierType) -> PlacementRequest {
    PlacementRequest {
        queue_item_id: QueueItemId::new(),
        order_id: OrderId::new("O-1042").unwrap(),
        owner_id: OwnerId::new(),
        supplier_type: supplier,
        payload: order_payload(),
    }
}
