//! Supplier adapters: translate a canonical placement request into each
//! supplier's wire format and normalize what comes back.
//!
//! ## Components
//!
//! - `SupplierAdapter`: one implementation per supplier
//! - `AdapterRegistry`: lookup by `SupplierType`, with generic fallback
//! - `CredentialStore`: opaque per-owner credential lookup
//! - `SupplierHttp`: shared HTTP client and response classification

pub mod adapter;
pub mod aliexpress;
pub mod bigbuy;
pub mod bts;
pub mod cj;
pub mod credentials;
pub mod generic;
pub mod http;

pub use adapter::{AdapterRegistry, SupplierAdapter, SupplierEndpoints};
pub use aliexpress::AliExpressAdapter;
pub use bigbuy::BigBuyAdapter;
pub use bts::BtsAdapter;
pub use cj::CjAdapter;
pub use credentials::{
    CredentialError, CredentialStore, InMemoryCredentialStore, SupplierCredentials,
};
pub use generic::GenericAdapter;
pub use http::SupplierHttp;

#[cfg(test)]
pub(crate) mod test_support;
