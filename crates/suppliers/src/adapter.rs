//! Adapter trait and registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use orderflow_fulfillment::{PlacementRequest, SupplierError, SupplierResult, SupplierType};

use crate::aliexpress::AliExpressAdapter;
use crate::bigbuy::BigBuyAdapter;
use crate::bts::BtsAdapter;
use crate::cj::CjAdapter;
use crate::credentials::CredentialStore;
use crate::generic::GenericAdapter;
use crate::http::SupplierHttp;

/// Places one order with one supplier.
///
/// Implementations must be safe to call again for the same request after a
/// retryable failure: they send the same supplier-side reference every time.
#[async_trait]
pub trait SupplierAdapter: Send + Sync {
    fn supplier_type(&self) -> SupplierType;

    async fn place_order(&self, request: &PlacementRequest) -> Result<SupplierResult, SupplierError>;
}

#[async_trait]
impl<T: SupplierAdapter + ?Sized> SupplierAdapter for Arc<T> {
    fn supplier_type(&self) -> SupplierType {
        (**self).supplier_type()
    }

    async fn place_order(&self, request: &PlacementRequest) -> Result<SupplierResult, SupplierError> {
        (**self).place_order(request).await
    }
}

/// Base URLs of the supplier APIs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SupplierEndpoints {
    pub cj: String,
    pub aliexpress: String,
    pub bigbuy: String,
    pub bts: String,
}

impl Default for SupplierEndpoints {
    fn default() -> Self {
        Self {
            cj: "https://developers.cjdropshipping.com/api2.0/v1".to_string(),
            aliexpress: "https://api-sg.aliexpress.com".to_string(),
            bigbuy: "https://api.bigbuy.eu".to_string(),
            bts: "https://api.btswholesaler.com".to_string(),
        }
    }
}

/// Adapters keyed by supplier type.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<SupplierType, Arc<dyn SupplierAdapter>>,
}

impl core::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut registered: Vec<_> = self.adapters.keys().map(SupplierType::as_str).collect();
        registered.sort_unstable();
        f.debug_struct("AdapterRegistry")
            .field("registered", &registered)
            .finish()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in adapter wired to `credentials`.
    pub fn with_defaults(
        endpoints: &SupplierEndpoints,
        credentials: Arc<dyn CredentialStore>,
        timeout: Duration,
    ) -> Result<Self, SupplierError> {
        let http = SupplierHttp::new(timeout)?;
        let mut registry = Self::new();
        registry.register(CjAdapter::new(http.clone(), &endpoints.cj, credentials.clone()));
        registry.register(AliExpressAdapter::new(
            http.clone(),
            &endpoints.aliexpress,
            credentials.clone(),
        ));
        registry.register(BigBuyAdapter::new(
            http.clone(),
            &endpoints.bigbuy,
            credentials.clone(),
        ));
        registry.register(BtsAdapter::new(http, &endpoints.bts, credentials));
        registry.register(GenericAdapter::new());
        Ok(registry)
    }

    /// Register (or replace) the adapter for its supplier type.
    pub fn register<A: SupplierAdapter + 'static>(&mut self, adapter: A) -> &mut Self {
        self.adapters.insert(adapter.supplier_type(), Arc::new(adapter));
        self
    }

    /// Adapter for `supplier`, falling back to the generic adapter.
    pub fn resolve(&self, supplier: SupplierType) -> Result<Arc<dyn SupplierAdapter>, SupplierError> {
        self.adapters
            .get(&supplier)
            .or_else(|| self.adapters.get(&SupplierType::Generic))
            .cloned()
            .ok_or(SupplierError::NoAdapter(supplier))
    }

    pub fn is_registered(&self, supplier: SupplierType) -> bool {
        self.adapters.contains_key(&supplier)
    }

    /// Resolve the adapter for the request and place the order.
    pub async fn place_order(&self, request: &PlacementRequest) -> Result<SupplierResult, SupplierError> {
        self.resolve(request.supplier_type)?.place_order(request).await
    }
}
