//! Infrastructure layer: queue persistence, event log, dispatcher, queue
//! service, configuration and database bootstrap.

pub mod config;
pub mod db;
pub mod dispatcher;
pub mod event_log;
pub mod service;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::{Config, ConfigError};
pub use dispatcher::{
    DispatchError, Dispatcher, DispatcherConfig, DispatcherHandle, DispatcherStats, ItemOutcome,
    ItemReport, ProcessReport,
};
pub use event_log::{EventLog, EventLogError, InMemoryEventLog, PostgresEventLog};
pub use service::{EnqueueOutcome, EnqueueRequest, QueueError, QueueService, StatusReport};
pub use store::{
    InMemoryQueueStore, InsertOutcome, PostgresQueueStore, QueueFilter, QueueStore,
    QueueStoreError, StatusCounts,
};
