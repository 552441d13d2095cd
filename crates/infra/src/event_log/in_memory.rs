use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use orderflow_core::QueueItemId;
use orderflow_fulfillment::EventLogEntry;

use super::{EventLog, EventLogError};

/// In-memory append-only event log.
///
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    entries: RwLock<Vec<EventLogEntry>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Every entry, in append order.
    pub fn all(&self) -> Vec<EventLogEntry> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, entry: EventLogEntry) -> Result<(), EventLogError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| EventLogError::Unavailable("event log lock poisoned".into()))?;
        if entries.iter().any(|e| e.id == entry.id) {
            return Err(EventLogError::Duplicate(entry.id.to_string()));
        }
        entries.push(entry);
        Ok(())
    }

    async fn for_item(&self, queue_item_id: QueueItemId) -> Result<Vec<EventLogEntry>, EventLogError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| EventLogError::Unavailable("event log lock poisoned".into()))?;
        Ok(entries
            .iter()
            .filter(|e| e.queue_item_id == queue_item_id)
            .cloned()
            .collect())
    }
}
