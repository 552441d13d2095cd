//! Supplier vocabulary shared by the queue and the adapters.
//!
//! The queue treats a payload as opaque JSON. Adapters decode it into the
//! canonical [`OrderPayload`] and report back a [`SupplierResult`] or a
//! classified [`SupplierError`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use orderflow_core::{DomainError, OrderId, OwnerId, QueueItemId};

/// External supplier an order is placed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupplierType {
    /// CJ Dropshipping.
    Cj,
    /// AliExpress dropshipping (DS) open platform.
    Aliexpress,
    /// BigBuy wholesale.
    Bigbuy,
    /// BTS Wholesaler.
    Bts,
    /// Suppliers without an API; placed manually.
    Generic,
}

impl SupplierType {
    pub const ALL: [SupplierType; 5] = [
        SupplierType::Cj,
        SupplierType::Aliexpress,
        SupplierType::Bigbuy,
        SupplierType::Bts,
        SupplierType::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SupplierType::Cj => "cj",
            SupplierType::Aliexpress => "aliexpress",
            SupplierType::Bigbuy => "bigbuy",
            SupplierType::Bts => "bts",
            SupplierType::Generic => "generic",
        }
    }
}

impl core::fmt::Display for SupplierType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for SupplierType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SupplierType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::validation(format!("unknown supplier type: {s}")))
    }
}

/// Shipping destination of an order.
///
/// Storefronts disagree on field names, so the common aliases are accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default, alias = "address")]
    pub address1: Option<String>,
    #[serde(default)]
    pub address2: Option<String>,
    #[serde(default)]
    pub house_number: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default, alias = "state")]
    pub province: Option<String>,
    #[serde(default, alias = "postal_code")]
    pub zip: Option<String>,
    #[serde(default, alias = "country")]
    pub country_code: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl ShippingAddress {
    /// Full recipient name, falling back to `first_name last_name`.
    pub fn recipient_name(&self) -> Option<String> {
        if let Some(name) = non_blank(&self.name) {
            return Some(name.to_string());
        }
        let parts: Vec<&str> = [non_blank(&self.first_name), non_blank(&self.last_name)]
            .into_iter()
            .flatten()
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }

    fn validate(&self) -> Result<(), SupplierError> {
        let mut missing = Vec::new();
        if self.recipient_name().is_none() {
            missing.push("name");
        }
        if non_blank(&self.address1).is_none() {
            missing.push("address1");
        }
        if non_blank(&self.city).is_none() {
            missing.push("city");
        }
        if non_blank(&self.zip).is_none() {
            missing.push("zip");
        }
        if non_blank(&self.country_code).is_none() {
            missing.push("country_code");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SupplierError::InvalidAddress(format!(
                "missing {}",
                missing.join(", ")
            )))
        }
    }
}

/// One product line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default, alias = "cj_variant_id")]
    pub variant_id: Option<String>,
    pub quantity: u32,
}

impl OrderLine {
    /// Supplier-side product reference: variant id when known, else SKU.
    pub fn reference(&self) -> Option<&str> {
        non_blank(&self.variant_id).or_else(|| non_blank(&self.sku))
    }
}

/// Canonical, supplier-agnostic order placement request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPayload {
    /// Storefront order number; used as the supplier-side reference.
    #[serde(default, alias = "orderNumber")]
    pub order_number: Option<String>,
    pub shipping: ShippingAddress,
    pub items: Vec<OrderLine>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub shipping_method: Option<String>,
}

impl OrderPayload {
    /// Decode and validate an opaque queue payload.
    pub fn from_value(value: &JsonValue) -> Result<Self, SupplierError> {
        let payload: OrderPayload = serde_json::from_value(value.clone())
            .map_err(|e| SupplierError::InvalidPayload(e.to_string()))?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn validate(&self) -> Result<(), SupplierError> {
        if self.items.is_empty() {
            return Err(SupplierError::InvalidPayload(
                "order has no line items".to_string(),
            ));
        }
        for (idx, line) in self.items.iter().enumerate() {
            if line.quantity == 0 {
                return Err(SupplierError::InvalidPayload(format!(
                    "line {idx}: quantity must be positive"
                )));
            }
            if line.reference().is_none() {
                return Err(SupplierError::InvalidPayload(format!(
                    "line {idx}: missing sku/variant_id"
                )));
            }
        }
        self.shipping.validate()
    }
}

/// What an adapter receives for one dispatch attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementRequest {
    pub queue_item_id: QueueItemId,
    pub order_id: OrderId,
    pub owner_id: OwnerId,
    pub supplier_type: SupplierType,
    pub payload: JsonValue,
}

impl PlacementRequest {
    /// Reference sent to the supplier.
    ///
    /// Stable across retries of the same queue item: the storefront order
    /// number when present, else the queue item id.
    pub fn supplier_reference(&self, payload: &OrderPayload) -> String {
        non_blank(&payload.order_number)
            .map(str::to_string)
            .unwrap_or_else(|| self.queue_item_id.to_string())
    }
}

/// Normalized successful placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierResult {
    pub supplier: SupplierType,
    pub supplier_order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier_order_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub raw_response: JsonValue,
}

impl SupplierResult {
    pub fn new(supplier: SupplierType, supplier_order_id: impl Into<String>) -> Self {
        Self {
            supplier,
            supplier_order_id: supplier_order_id.into(),
            supplier_order_number: None,
            status: None,
            raw_response: JsonValue::Null,
        }
    }

    pub fn with_order_number(mut self, number: Option<String>) -> Self {
        self.supplier_order_number = number;
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_raw_response(mut self, raw: JsonValue) -> Self {
        self.raw_response = raw;
        self
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Normalized supplier failure.
///
/// The retryable/non-retryable split drives the queue: retryable errors are
/// rescheduled with backoff, everything else fails the item immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupplierError {
    #[error("supplier request timed out: {0}")]
    Timeout(String),

    #[error("supplier unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("supplier rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("credential lookup unavailable: {0}")]
    CredentialStoreUnavailable(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("out of stock: {0}")]
    OutOfStock(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("credentials not configured: {0}")]
    MissingCredentials(String),

    #[error("order rejected by supplier ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected supplier response: {0}")]
    UnexpectedResponse(String),

    #[error("no adapter registered for supplier {0}")]
    NoAdapter(SupplierType),
}

impl SupplierError {
    /// Whether the failure is worth another attempt.
    ///
    /// An undecodable success response is not retryable: the supplier may
    /// already have accepted the order.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SupplierError::Timeout(_)
                | SupplierError::Unavailable { .. }
                | SupplierError::RateLimited { .. }
                | SupplierError::Network(_)
                | SupplierError::CredentialStoreUnavailable(_)
        )
    }

    /// Minimum wait the supplier asked for, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SupplierError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Stable machine-readable code stored in the event log.
    pub fn code(&self) -> &'static str {
        match self {
            SupplierError::Timeout(_) => "timeout",
            SupplierError::Unavailable { .. } => "unavailable",
            SupplierError::RateLimited { .. } => "rate_limited",
            SupplierError::Network(_) => "network",
            SupplierError::CredentialStoreUnavailable(_) => "credential_store_unavailable",
            SupplierError::InvalidPayload(_) => "invalid_payload",
            SupplierError::InvalidAddress(_) => "invalid_address",
            SupplierError::OutOfStock(_) => "out_of_stock",
            SupplierError::InvalidCredentials(_) => "invalid_credentials",
            SupplierError::MissingCredentials(_) => "missing_credentials",
            SupplierError::Rejected { .. } => "rejected",
            SupplierError::UnexpectedResponse(_) => "unexpected_response",
            SupplierError::NoAdapter(_) => "no_adapter",
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
