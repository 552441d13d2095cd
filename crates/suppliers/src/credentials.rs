//! Per-owner supplier credential lookup.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Deserialize;

use orderflow_core::OwnerId;
use orderflow_fulfillment::{SupplierError, SupplierType};

/// Credentials for one supplier account.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SupplierCredentials {
    /// Bearer-style token sent in a supplier-specific header (CJ).
    AccessToken { access_token: SecretString },
    /// API key sent as `Authorization: Bearer` (BigBuy).
    ApiKey { api_key: SecretString },
    /// Signed-request credentials (AliExpress open platform).
    AppKey {
        app_key: String,
        app_secret: SecretString,
        #[serde(default)]
        session: Option<SecretString>,
    },
    /// HTTP basic auth (BTS).
    Basic {
        username: String,
        password: SecretString,
    },
}

impl SupplierCredentials {
    pub fn kind(&self) -> &'static str {
        match self {
            SupplierCredentials::AccessToken { .. } => "access_token",
            SupplierCredentials::ApiKey { .. } => "api_key",
            SupplierCredentials::AppKey { .. } => "app_key",
            SupplierCredentials::Basic { .. } => "basic",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read credentials file: {0}")]
    Io(String),
    #[error("invalid credentials file: {0}")]
    Parse(String),
}

impl From<CredentialError> for SupplierError {
    fn from(err: CredentialError) -> Self {
        SupplierError::CredentialStoreUnavailable(err.to_string())
    }
}

/// Opaque credential lookup keyed by (owner, supplier).
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn lookup(
        &self,
        owner_id: OwnerId,
        supplier: SupplierType,
    ) -> Result<Option<Arc<SupplierCredentials>>, CredentialError>;
}

#[async_trait]
impl<T: CredentialStore + ?Sized> CredentialStore for Arc<T> {
    async fn lookup(
        &self,
        owner_id: OwnerId,
        supplier: SupplierType,
    ) -> Result<Option<Arc<SupplierCredentials>>, CredentialError> {
        (**self).lookup(owner_id, supplier).await
    }
}

/// Resolve credentials for an attempt, mapping absence to a permanent error.
pub async fn require(
    store: &dyn CredentialStore,
    owner_id: OwnerId,
    supplier: SupplierType,
) -> Result<Arc<SupplierCredentials>, SupplierError> {
    store
        .lookup(owner_id, supplier)
        .await?
        .ok_or_else(|| {
            SupplierError::MissingCredentials(format!(
                "no {supplier} credentials configured for owner {owner_id}"
            ))
        })
}

/// Error for credentials of the wrong shape for a supplier.
pub fn wrong_kind(supplier: SupplierType, expected: &str, got: &SupplierCredentials) -> SupplierError {
    SupplierError::InvalidCredentials(format!(
        "{supplier} expects {expected} credentials, found {}",
        got.kind()
    ))
}

/// Entry of a credentials file.
///
/// An entry without `owner_id` applies to every owner that has no entry of
/// its own for the same supplier.
#[derive(Debug, Deserialize)]
struct CredentialEntry {
    #[serde(default)]
    owner_id: Option<OwnerId>,
    supplier: SupplierType,
    credentials: SupplierCredentials,
}

/// In-memory credential store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    by_owner: RwLock<HashMap<(OwnerId, SupplierType), Arc<SupplierCredentials>>>,
    shared: RwLock<HashMap<SupplierType, Arc<SupplierCredentials>>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Load entries from a JSON array file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CredentialError::Io(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CredentialError> {
        let entries: Vec<CredentialEntry> =
            serde_json::from_str(raw).map_err(|e| CredentialError::Parse(e.to_string()))?;

        let store = Self::new();
        for entry in entries {
            match entry.owner_id {
                Some(owner) => store.insert(owner, entry.supplier, entry.credentials),
                None => store.insert_shared(entry.supplier, entry.credentials),
            }
        }
        Ok(store)
    }

    pub fn insert(&self, owner_id: OwnerId, supplier: SupplierType, creds: SupplierCredentials) {
        self.by_owner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((owner_id, supplier), Arc::new(creds));
    }

    pub fn insert_shared(&self, supplier: SupplierType, creds: SupplierCredentials) {
        self.shared
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(supplier, Arc::new(creds));
    }

    pub fn len(&self) -> usize {
        self.by_owner.read().map(|m| m.len()).unwrap_or(0)
            + self.shared.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn lookup(
        &self,
        owner_id: OwnerId,
        supplier: SupplierType,
    ) -> Result<Option<Arc<SupplierCredentials>>, CredentialError> {
        let by_owner = self
            .by_owner
            .read()
            .map_err(|_| CredentialError::Unavailable("credential map poisoned".into()))?;
        if let Some(creds) = by_owner.get(&(owner_id, supplier)) {
            return Ok(Some(creds.clone()));
        }
        drop(by_owner);

        let shared = self
            .shared
            .read()
            .map_err(|_| CredentialError::Unavailable("credential map poisoned".into()))?;
        Ok(shared.get(&supplier).cloned())
    }
}
