//! BTS Wholesaler adapter.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, instrument};

use orderflow_fulfillment::{
    OrderPayload, PlacementRequest, SupplierError, SupplierResult, SupplierType,
};

use crate::adapter::SupplierAdapter;
use crate::cj::json_id;
use crate::credentials::{self, CredentialStore, SupplierCredentials};
use crate::http::SupplierHttp;

pub struct BtsAdapter {
    http: SupplierHttp,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
}

impl BtsAdapter {
    pub fn new(http: SupplierHttp, base_url: &str, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn order_body(request: &PlacementRequest, payload: &OrderPayload) -> JsonValue {
        let ship = &payload.shipping;
        let products: Vec<JsonValue> = payload
            .items
            .iter()
            .map(|line| json!({ "sku": line.reference(), "quantity": line.quantity }))
            .collect();

        json!({
            "reference": request.supplier_reference(payload),
            "shipping_address": {
                "name": ship.recipient_name(),
                "address": ship.address1,
                "address2": ship.address2,
                "city": ship.city,
                "province": ship.province,
                "postal_code": ship.zip,
                "country_code": ship.country_code,
                "phone": ship.phone,
                "email": ship.email,
            },
            "products": products,
            "comments": payload.note,
        })
    }

    fn interpret(response: JsonValue) -> Result<SupplierResult, SupplierError> {
        let body = response.get("data").unwrap_or(&response);
        let order_id = body
            .get("order_id")
            .or_else(|| body.get("id"))
            .and_then(json_id)
            .ok_or_else(|| {
                SupplierError::UnexpectedResponse("BTS success response without order id".into())
            })?;
        let order_number = body.get("order_number").and_then(json_id);
        let status = body
            .get("status")
            .and_then(JsonValue::as_str)
            .unwrap_or("submitted")
            .to_string();

        Ok(SupplierResult::new(SupplierType::Bts, order_id)
            .with_order_number(order_number)
            .with_status(status)
            .with_raw_response(response))
    }
}

#[async_trait]
impl SupplierAdapter for BtsAdapter {
    fn supplier_type(&self) -> SupplierType {
        SupplierType::Bts
    }

    #[instrument(
        skip(self, request),
        fields(queue_id = %request.queue_item_id, order_id = %request.order_id),
        err
    )]
    async fn place_order(&self, request: &PlacementRequest) -> Result<SupplierResult, SupplierError> {
        let payload = OrderPayload::from_value(&request.payload)?;
        let creds =
            credentials::require(&*self.credentials, request.owner_id, SupplierType::Bts).await?;
        let SupplierCredentials::Basic { username, password } = creds.as_ref() else {
            return Err(credentials::wrong_kind(SupplierType::Bts, "basic", &creds));
        };

        let url = format!("{}/api/v1/orders", self.base_url);
        debug!(%url, "creating BTS order");

        let response = self
            .http
            .send_json(
                self.http
                    .client()
                    .post(&url)
                    .basic_auth(username, Some(password.expose_secret()))
                    .json(&Self::order_body(request, &payload)),
            )
            .await?;

        Self::interpret(response)
    }
}
