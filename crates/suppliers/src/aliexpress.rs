//! AliExpress dropshipping (open platform) adapter.
//!
//! Requests are signed: all parameters except `sign` are sorted by key,
//! concatenated as `key1value1key2value2…`, and HMAC-SHA256'd with the app
//! secret. The signature is sent as uppercase hex.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use serde_json::{Value as JsonValue, json};
use sha2::Sha256;
use tracing::{debug, instrument};

use orderflow_fulfillment::{
    OrderPayload, PlacementRequest, SupplierError, SupplierResult, SupplierType,
};

use crate::adapter::SupplierAdapter;
use crate::cj::json_id;
use crate::credentials::{self, CredentialStore, SupplierCredentials};
use crate::http::{SupplierHttp, classify_rejection};

const METHOD: &str = "aliexpress.ds.order.create";
const ORDER_PARAM: &str = "param_place_order_request4_open_api_d_t_o";

pub struct AliExpressAdapter {
    http: SupplierHttp,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
}

impl AliExpressAdapter {
    pub fn new(http: SupplierHttp, base_url: &str, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn order_param(request: &PlacementRequest, payload: &OrderPayload) -> JsonValue {
        let ship = &payload.shipping;
        let items: Vec<JsonValue> = payload
            .items
            .iter()
            .map(|line| {
                json!({
                    "product_id": line.sku.as_deref().or(line.variant_id.as_deref()),
                    "sku_attr": line.variant_id.as_deref().unwrap_or_default(),
                    "product_count": line.quantity,
                    "logistics_service_name": payload.shipping_method,
                    "order_memo": payload.note,
                })
            })
            .collect();

        json!({
            "out_order_id": request.supplier_reference(payload),
            "logistics_address": {
                "contact_person": ship.recipient_name(),
                "address": ship.address1,
                "address2": ship.address2,
                "city": ship.city,
                "province": ship.province,
                "zip": ship.zip,
                "country": ship.country_code,
                "mobile_no": ship.phone,
            },
            "product_items": items,
        })
    }

    fn interpret(response: JsonValue) -> Result<SupplierResult, SupplierError> {
        // Gateway-level errors (bad signature, expired session) carry a top-level code.
        if let Some(code) = response.get("code").and_then(JsonValue::as_str) {
            if code != "0" {
                let message = response
                    .get("message")
                    .and_then(JsonValue::as_str)
                    .unwrap_or(code);
                return Err(classify_rejection(200, &format!("{code}: {message}")));
            }
        }

        let result = response
            .get("aliexpress_ds_order_create_response")
            .and_then(|r| r.get("result"))
            .ok_or_else(|| {
                SupplierError::UnexpectedResponse("AliExpress response without result".into())
            })?;

        if result.get("is_success").and_then(JsonValue::as_bool) != Some(true) {
            let message = result
                .get("error_msg")
                .or_else(|| result.get("error_code"))
                .and_then(JsonValue::as_str)
                .unwrap_or("AliExpress rejected the order");
            return Err(classify_rejection(200, message));
        }

        let order_id = result
            .get("order_list")
            .and_then(JsonValue::as_array)
            .and_then(|list| list.first())
            .and_then(json_id)
            .ok_or_else(|| {
                SupplierError::UnexpectedResponse("AliExpress success without order_list".into())
            })?;

        Ok(SupplierResult::new(SupplierType::Aliexpress, order_id).with_raw_response(response))
    }
}

/// Uppercase hex HMAC-SHA256 over the sorted `key+value` concatenation.
pub fn sign(params: &BTreeMap<String, String>, secret: &str) -> Result<String, SupplierError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| SupplierError::InvalidCredentials(format!("unusable app secret: {e}")))?;
    for (key, value) in params.iter().filter(|(k, _)| k.as_str() != "sign") {
        mac.update(key.as_bytes());
        mac.update(value.as_bytes());
    }
    Ok(hex::encode_upper(mac.finalize().into_bytes()))
}

#[async_trait]
impl SupplierAdapter for AliExpressAdapter {
    fn supplier_type(&self) -> SupplierType {
        SupplierType::Aliexpress
    }

    #[instrument(
        skip(self, request),
        fields(queue_id = %request.queue_item_id, order_id = %request.order_id),
        err
    )]
    async fn place_order(&self, request: &PlacementRequest) -> Result<SupplierResult, SupplierError> {
        let payload = OrderPayload::from_value(&request.payload)?;
        let creds =
            credentials::require(&*self.credentials, request.owner_id, SupplierType::Aliexpress)
                .await?;
        let SupplierCredentials::AppKey {
            app_key,
            app_secret,
            session,
        } = creds.as_ref()
        else {
            return Err(credentials::wrong_kind(
                SupplierType::Aliexpress,
                "app_key",
                &creds,
            ));
        };

        let mut params = BTreeMap::new();
        params.insert("method".to_string(), METHOD.to_string());
        params.insert("app_key".to_string(), app_key.clone());
        params.insert(
            "timestamp".to_string(),
            Utc::now().timestamp_millis().to_string(),
        );
        params.insert("sign_method".to_string(), "sha256".to_string());
        if let Some(session) = session {
            params.insert("session".to_string(), session.expose_secret().to_string());
        }
        params.insert(
            ORDER_PARAM.to_string(),
            Self::order_param(request, &payload).to_string(),
        );
        let signature = sign(&params, app_secret.expose_secret())?;
        params.insert("sign".to_string(), signature);

        let url = format!("{}/sync", self.base_url);
        debug!(%url, "creating AliExpress order");

        let response = self
            .http
            .send_json(self.http.client().post(&url).form(&params))
            .await?;

        Self::interpret(response)
    }
}
