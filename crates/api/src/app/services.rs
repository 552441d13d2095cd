use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use orderflow_infra::{
    Config, Dispatcher, DispatcherConfig, EventLog, InMemoryEventLog, InMemoryQueueStore,
    PostgresEventLog, PostgresQueueStore, QueueService, QueueStore, db,
};
use orderflow_suppliers::{AdapterRegistry, CredentialStore, InMemoryCredentialStore};

pub type DynQueueStore = Arc<dyn QueueStore>;
pub type DynEventLog = Arc<dyn EventLog>;
pub type AppDispatcher = Dispatcher<DynQueueStore, DynEventLog>;

/// Everything the handlers need, shared across requests.
pub struct AppServices {
    pub queue: QueueService<DynQueueStore, DynEventLog>,
    pub dispatcher: Arc<AppDispatcher>,
    /// Storage backend name reported by `/health`.
    pub backend: &'static str,
}

impl AppServices {
    pub fn new(
        store: DynQueueStore,
        events: DynEventLog,
        adapters: AdapterRegistry,
        dispatcher: DispatcherConfig,
        default_max_attempts: u32,
        backend: &'static str,
    ) -> Self {
        Self {
            queue: QueueService::new(store.clone(), events.clone())
                .with_default_max_attempts(default_max_attempts),
            dispatcher: Arc::new(Dispatcher::new(store, events, Arc::new(adapters), dispatcher)),
            backend,
        }
    }

    /// In-memory wiring (dev/test).
    pub fn in_memory(adapters: AdapterRegistry, dispatcher: DispatcherConfig) -> Self {
        let store: DynQueueStore = InMemoryQueueStore::arc();
        let events: DynEventLog = InMemoryEventLog::arc();
        Self::new(
            store,
            events,
            adapters,
            dispatcher,
            orderflow_fulfillment::DEFAULT_MAX_ATTEMPTS,
            "in_memory",
        )
    }
}

/// Wire services from configuration: Postgres when a database URL is set,
/// in-memory stores otherwise.
pub async fn build_services(config: &Config) -> anyhow::Result<AppServices> {
    let credentials: Arc<dyn CredentialStore> = match &config.credentials_file {
        Some(path) => {
            let store = InMemoryCredentialStore::from_json_file(path)
                .with_context(|| format!("loading supplier credentials from {path}"))?;
            info!(path, accounts = store.len(), "supplier credentials loaded");
            Arc::new(store)
        }
        None => {
            warn!("ORDERFLOW_CREDENTIALS_FILE not set; supplier adapters will report missing credentials");
            InMemoryCredentialStore::arc()
        }
    };

    let adapters = AdapterRegistry::with_defaults(
        &config.supplier_endpoints(),
        credentials,
        config.supplier_timeout(),
    )
    .context("building supplier adapters")?;

    let (store, events, backend): (DynQueueStore, DynEventLog, &'static str) =
        match &config.database_url {
            Some(url) => {
                let pool = db::connect(url, config.db_max_connections)
                    .await
                    .context("connecting to Postgres")?;
                db::run_migrations(&pool)
                    .await
                    .context("running database migrations")?;
                (
                    Arc::new(PostgresQueueStore::new(pool.clone())) as DynQueueStore,
                    Arc::new(PostgresEventLog::new(pool)) as DynEventLog,
                    "postgres",
                )
            }
            None => {
                warn!("ORDERFLOW_DATABASE_URL not set; using in-memory stores (state is lost on restart)");
                (
                    InMemoryQueueStore::arc() as DynQueueStore,
                    InMemoryEventLog::arc() as DynEventLog,
                    "in_memory",
                )
            }
        };

    info!(backend, adapters = ?adapters, "services wired");
    Ok(AppServices::new(
        store,
        events,
        adapters,
        config
            .dispatcher_config()
            .with_name(format!("dispatcher-{backend}")),
        config.max_attempts,
        backend,
    ))
}
