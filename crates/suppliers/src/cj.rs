//! CJ Dropshipping adapter.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, instrument};

use orderflow_fulfillment::{
    OrderPayload, PlacementRequest, SupplierError, SupplierResult, SupplierType,
};

use crate::adapter::SupplierAdapter;
use crate::credentials::{self, CredentialStore, SupplierCredentials};
use crate::http::{SupplierHttp, classify_rejection};

const DEFAULT_LOGISTIC: &str = "CJPacket";
const PHONE_PLACEHOLDER: &str = "0000000000";

pub struct CjAdapter {
    http: SupplierHttp,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
}

impl CjAdapter {
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
            .map(|line| json!({ "vid": line.reference(), "quantity": line.quantity }))
            .collect();

        json!({
            "orderNumber": request.supplier_reference(payload),
            "shippingZip": ship.zip,
            "shippingCountryCode": ship.country_code,
            "shippingProvince": ship.province.as_deref().unwrap_or_default(),
            "shippingCity": ship.city,
            "shippingAddress": ship.address1,
            "shippingCustomerName": ship.recipient_name(),
            "shippingPhone": ship.phone.as_deref().unwrap_or(PHONE_PLACEHOLDER),
            "products": products,
            "remark": payload.note.as_deref().unwrap_or_default(),
            "logisticName": payload.shipping_method.as_deref().unwrap_or(DEFAULT_LOGISTIC),
            "houseNumber": ship.house_number.as_deref().unwrap_or_default(),
        })
    }

    /// CJ answers 200 even for business failures; `result`/`code` decide.
    fn interpret(response: JsonValue) -> Result<SupplierResult, SupplierError> {
        let accepted = response.get("result").and_then(JsonValue::as_bool) == Some(true)
            && response.get("code").and_then(JsonValue::as_i64) == Some(200);

        if !accepted {
            let message = response
                .get("message")
                .and_then(JsonValue::as_str)
                .unwrap_or("CJ rejected the order");
            return Err(classify_rejection(200, message));
        }

        let data = response.get("data");
        let order_id = data
            .and_then(|d| d.get("orderId"))
            .and_then(json_id)
            .ok_or_else(|| {
                SupplierError::UnexpectedResponse("CJ success response without data.orderId".into())
            })?;
        let order_number = data.and_then(|d| d.get("orderNum")).and_then(json_id);

        Ok(SupplierResult::new(SupplierType::Cj, order_id)
            .with_order_number(order_number)
            .with_raw_response(response))
    }
}

#[async_trait]
impl SupplierAdapter for CjAdapter {
    fn supplier_type(&self) -> SupplierType {
        SupplierType::Cj
    }

    #[instrument(
        skip(self, request),
        fields(queue_id = %request.queue_item_id, order_id = %request.order_id),
        err
    )]
    async fn place_order(&self, request: &PlacementRequest) -> Result<SupplierResult, SupplierError> {
        let payload = OrderPayload::from_value(&request.payload)?;
        let creds =
            credentials::require(&*self.credentials, request.owner_id, SupplierType::Cj).await?;
        let SupplierCredentials::AccessToken { access_token } = creds.as_ref() else {
            return Err(credentials::wrong_kind(SupplierType::Cj, "access_token", &creds));
        };

        let body = Self::order_body(request, &payload);
        let url = format!("{}/shopping/order/createOrder", self.base_url);
        debug!(%url, "creating CJ order");

        let response = self
            .http
            .send_json(
                self.http
                    .client()
                    .post(&url)
                    .header("CJ-Access-Token", access_token.expose_secret())
                    .json(&body),
            )
            .await?;

        Self::interpret(response)
    }
}

/// Supplier ids come back as strings or numbers.
pub(crate) fn json_id(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::InMemoryCredentialStore;
    use crate::test_support::{FakeSupplier, placement_request};
    use axum::Json;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use secrecy::SecretString;
    use std::time::Duration;

    fn adapter(base_url: &str, request: &PlacementRequest) -> CjAdapter {
        let creds = InMemoryCredentialStore::new();
        creds.insert(
            request.owner_id,
            SupplierType::Cj,
            SupplierCredentials::AccessToken {
                access_token: SecretString::from("cj-token".to_string()),
            },
        );
        CjAdapter::new(
            SupplierHttp::new(Duration::from_millis(500)).unwrap(),
            base_url,
            Arc::new(creds),
        )
    }

    #[tokio::test]
    async fn places_order_with_token_header() {
        let fake = FakeSupplier::spawn(axum::Router::new().route(
            "/shopping/order/createOrder",
            post(|headers: HeaderMap, Json(body): Json<JsonValue>| async move {
                assert_eq!(headers["CJ-Access-Token"], "cj-token");
                assert_eq!(body["orderNumber"], "1042");
                assert_eq!(body["shippingCustomerName"], "Ada Lovelace");
                assert_eq!(body["products"][0]["vid"], "VID-1");
                assert_eq!(body["logisticName"], "CJPacket");
                Json(json!({
                    "result": true,
                    "code": 200,
                    "data": { "orderId": "CJ-9001", "orderNum": "SD1042" }
                }))
            }),
        ))
        .await;

        let request = placement_request(SupplierType::Cj);
        let result = adapter(&fake.base_url, &request)
            .place_order(&request)
            .await
            .unwrap();

        assert_eq!(result.supplier_order_id, "CJ-9001");
        assert_eq!(result.supplier_order_number.as_deref(), Some("SD1042"));
        assert_eq!(result.raw_response["code"], 200);
    }

    #[tokio::test]
    async fn business_rejection_is_classified() {
        let fake = FakeSupplier::spawn(axum::Router::new().route(
            "/shopping/order/createOrder",
            post(|| async {
                Json(json!({ "result": false, "code": 1600100, "message": "Invalid shipping address" }))
            }),
        ))
        .await;

        let request = placement_request(SupplierType::Cj);
        let err = adapter(&fake.base_url, &request)
            .place_order(&request)
            .await
            .unwrap_err();
        assert!(matches!(err, SupplierError::InvalidAddress(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn gateway_errors_are_retryable() {
        let fake = FakeSupplier::spawn(axum::Router::new().route(
            "/shopping/order/createOrder",
            post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        ))
        .await;

        let request = placement_request(SupplierType::Cj);
        let err = adapter(&fake.base_url, &request)
            .place_order(&request)
            .await
            .unwrap_err();
        assert!(matches!(err, SupplierError::Unavailable { status: 502, .. }));
    }

    #[tokio::test]
    async fn slow_supplier_times_out() {
        let fake = FakeSupplier::spawn(axum::Router::new().route(
            "/shopping/order/createOrder",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(json!({}))
            }),
        ))
        .await;

        let request = placement_request(SupplierType::Cj);
        let err = adapter(&fake.base_url, &request)
            .place_order(&request)
            .await
            .unwrap_err();
        assert!(matches!(err, SupplierError::Timeout(_)), "got {err:?}");
        assert!(err.is_retryable());
    }

    #[test]
    fn success_without_order_id_is_not_retried() {
        let err = CjAdapter::interpret(json!({ "result": true, "code": 200, "data": {} })).unwrap_err();
        assert!(matches!(err, SupplierError::UnexpectedResponse(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_request() {
        let request = placement_request(SupplierType::Cj);
        let adapter = CjAdapter::new(
            SupplierHttp::new(Duration::from_millis(100)).unwrap(),
            "http://127.0.0.1:9",
            Arc::new(InMemoryCredentialStore::new()),
        );
        let err = adapter.place_order(&request).await.unwrap_err();
        assert!(matches!(err, SupplierError::MissingCredentials(_)));
    }
}
