//! Append-only event log boundary.
//!
//! Entries are written after the queue transition they describe has been
//! persisted; nothing updates or deletes them.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

use orderflow_core::QueueItemId;
use orderflow_fulfillment::EventLogEntry;

pub use in_memory::InMemoryEventLog;
pub use postgres::PostgresEventLog;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EventLogError {
    #[error("event already recorded: {0}")]
    Duplicate(String),
    #[error("event log unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt event row: {0}")]
    Corrupt(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, entry: EventLogEntry) -> Result<(), EventLogError>;

    /// Entries for one queue item, in append order.
    async fn for_item(&self, queue_item_id: QueueItemId) -> Result<Vec<EventLogEntry>, EventLogError>;
}

#[async_trait]
impl<T: EventLog + ?Sized> EventLog for Arc<T> {
    async fn append(&self, entry: EventLogEntry) -> Result<(), EventLogError> {
        (**self).append(entry).await
    }

    async fn for_item(&self, queue_item_id: QueueItemId) -> Result<Vec<EventLogEntry>, EventLogError> {
        (**self).for_item(queue_item_id).await
    }
}
