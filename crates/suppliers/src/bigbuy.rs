//! BigBuy wholesale adapter.

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

pub struct BigBuyAdapter {
    http: SupplierHttp,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
}

impl BigBuyAdapter {
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
            .map(|line| {
                json!({
                    "reference": line.sku.as_deref().or(line.variant_id.as_deref()),
                    "quantity": line.quantity,
                })
            })
            .collect();

        json!({
            "internalReference": request.supplier_reference(payload),
            "delivery": {
                "name": ship.recipient_name(),
                "address": ship.address1,
                "postalCode": ship.zip,
                "town": ship.city,
                "country": ship.country_code,
                "phone": ship.phone,
                "email": ship.email,
            },
            "products": products,
        })
    }

    fn interpret(response: JsonValue) -> Result<SupplierResult, SupplierError> {
        let order_id = response.get("orderId").and_then(json_id).ok_or_else(|| {
            SupplierError::UnexpectedResponse("BigBuy success response without orderId".into())
        })?;
        let order_number = response.get("orderNumber").and_then(json_id);

        Ok(SupplierResult::new(SupplierType::Bigbuy, order_id)
            .with_order_number(order_number)
            .with_raw_response(response))
    }
}

#[async_trait]
impl SupplierAdapter for BigBuyAdapter {
    fn supplier_type(&self) -> SupplierType {
        SupplierType::Bigbuy
    }

    #[instrument(
        skip(self, request),
        fields(queue_id = %request.queue_item_id, order_id = %request.order_id),
        err
    )]
    async fn place_order(&self, request: &PlacementRequest) -> Result<SupplierResult, SupplierError> {
        let payload = OrderPayload::from_value(&request.payload)?;
        let creds =
            credentials::require(&*self.credentials, request.owner_id, SupplierType::Bigbuy)
                .await?;
        let SupplierCredentials::ApiKey { api_key } = creds.as_ref() else {
            return Err(credentials::wrong_kind(SupplierType::Bigbuy, "api_key", &creds));
        };

        let url = format!("{}/rest/order/create.json", self.base_url);
        debug!(%url, "creating BigBuy order");

        let response = self
            .http
            .send_json(
                self.http
                    .client()
                    .post(&url)
                    .bearer_auth(api_key.expose_secret())
                    .json(&Self::order_body(request, &payload)),
            )
            .await?;

        Self::interpret(response)
    }
}
