//! Runtime configuration, read from `ORDERFLOW_*` environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use orderflow_fulfillment::{BackoffPolicy, DEFAULT_MAX_ATTEMPTS};
use orderflow_suppliers::SupplierEndpoints;

use crate::dispatcher::DispatcherConfig;

pub const ENV_PREFIX: &str = "ORDERFLOW_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Postgres URL; in-memory stores are used when unset.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub bind_addr: SocketAddr,

    pub batch_size: usize,
    pub max_concurrent: Option<usize>,
    pub dispatch_interval_secs: u64,
    pub run_dispatcher: bool,
    pub stale_claim_secs: u64,

    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    pub backoff_jitter_secs: u64,

    pub supplier_timeout_secs: u64,
    /// JSON credential file for the in-memory credential store.
    pub credentials_file: Option<String>,
    pub cj_base_url: Option<String>,
    pub aliexpress_base_url: Option<String>,
    pub bigbuy_base_url: Option<String>,
    pub bts_base_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 10,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            batch_size: 10,
            max_concurrent: None,
            dispatch_interval_secs: 60,
            run_dispatcher: true,
            stale_claim_secs: 15 * 60,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_secs: 60,
            backoff_max_secs: 3600,
            backoff_jitter_secs: 10,
            supplier_timeout_secs: 30,
            credentials_file: None,
            cj_base_url: None,
            aliexpress_base_url: None,
            bigbuy_base_url: None,
            bts_base_url: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config = envy::prefixed(ENV_PREFIX).from_env::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    /// Same as [`Config::load`] over explicit `(KEY, value)` pairs.
    pub fn from_iter<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::prefixed(ENV_PREFIX).from_iter::<_, Self>(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.max_concurrent == Some(0) {
            return Err(ConfigError::Invalid("max_concurrent must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.dispatch_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "dispatch_interval_secs must be at least 1".into(),
            ));
        }
        if self.backoff_base_secs > self.backoff_max_secs {
            return Err(ConfigError::Invalid(format!(
                "backoff_base_secs ({}) exceeds backoff_max_secs ({})",
                self.backoff_base_secs, self.backoff_max_secs
            )));
        }
        if self.supplier_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "supplier_timeout_secs must be at least 1".into(),
            ));
        }
        // A claim younger than one supplier call may still be in flight.
        if self.stale_claim_secs <= self.supplier_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "stale_claim_secs ({}) must exceed supplier_timeout_secs ({})",
                self.stale_claim_secs, self.supplier_timeout_secs
            )));
        }
        Ok(())
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_secs(self.backoff_base_secs),
            Duration::from_secs(self.backoff_max_secs),
            Duration::from_secs(self.backoff_jitter_secs),
        )
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        let config = DispatcherConfig::default()
            .with_batch_size(self.batch_size)
            .with_backoff(self.backoff_policy())
            .with_stale_claim_after(Duration::from_secs(self.stale_claim_secs));
        match self.max_concurrent {
            Some(n) => config.with_max_concurrent(n),
            None => config,
        }
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_interval_secs)
    }

    pub fn supplier_timeout(&self) -> Duration {
        Duration::from_secs(self.supplier_timeout_secs)
    }

    /// Default supplier endpoints with any configured overrides applied.
    pub fn supplier_endpoints(&self) -> SupplierEndpoints {
        let mut endpoints = SupplierEndpoints::default();
        let overrides = [
            (&mut endpoints.cj, &self.cj_base_url),
            (&mut endpoints.aliexpress, &self.aliexpress_base_url),
            (&mut endpoints.bigbuy, &self.bigbuy_base_url),
            (&mut endpoints.bts, &self.bts_base_url),
        ];
        for (slot, url) in overrides {
            if let Some(url) = url {
                *slot = url.trim_end_matches('/').to_string();
            }
        }
        endpoints
    }
}
