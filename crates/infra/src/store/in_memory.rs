use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use orderflow_core::QueueItemId;
use orderflow_fulfillment::{QueueItem, QueueStatus};

use super::{InsertOutcome, QueueFilter, QueueStore, QueueStoreError, StatusCounts};

/// In-memory queue store for tests/dev.
///
/// Every operation runs under one lock, which makes the compare-and-swap
/// transitions trivially atomic.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    items: RwLock<HashMap<QueueItemId, QueueItem>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<QueueItemId, QueueItem>>, QueueStoreError> {
        self.items
            .read()
            .map_err(|_| QueueStoreError::Unavailable("queue lock poisoned".into()))
    }

    fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<QueueItemId, QueueItem>>, QueueStoreError> {
        self.items
            .write()
            .map_err(|_| QueueStoreError::Unavailable("queue lock poisoned".into()))
    }
}

fn live_item_for<'a>(
    items: &'a HashMap<QueueItemId, QueueItem>,
    item: &QueueItem,
) -> Option<&'a QueueItem> {
    items
        .values()
        .find(|other| other.id != item.id && other.order_id == item.order_id && !other.status.is_terminal())
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn insert_pending(&self, item: QueueItem) -> Result<InsertOutcome, QueueStoreError> {
        let mut items = self.write()?;
        if let Some(existing) = live_item_for(&items, &item) {
            return Ok(InsertOutcome::Duplicate(existing.clone()));
        }
        if items.contains_key(&item.id) {
            return Err(QueueStoreError::Conflict(format!(
                "queue item {} already exists",
                item.id
            )));
        }
        items.insert(item.id, item.clone());
        Ok(InsertOutcome::Inserted(item))
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>, QueueStoreError> {
        Ok(self.read()?.get(&id).cloned())
    }

    async fn list(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>, QueueStoreError> {
        let items = self.read()?;
        let mut result: Vec<_> = items.values().filter(|i| filter.matches(i)).cloned().collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        result.truncate(filter.limit);
        Ok(result)
    }

    async fn count_by_status(&self, filter: &QueueFilter) -> Result<StatusCounts, QueueStoreError> {
        let items = self.read()?;
        let mut counts = StatusCounts::default();
        for item in items.values().filter(|i| filter.matches(i)) {
            counts.add(item.status, 1);
        }
        Ok(counts)
    }

    async fn select_eligible(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, QueueStoreError> {
        let items = self.read()?;
        let mut result: Vec<_> = items.values().filter(|i| i.is_eligible(now)).cloned().collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        result.truncate(limit);
        Ok(result)
    }

    async fn claim(
        &self,
        id: QueueItemId,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, QueueStoreError> {
        let mut items = self.write()?;
        match items.get_mut(&id) {
            Some(item) if item.is_eligible(now) => {
                item.claim(now)
                    .map_err(|e| QueueStoreError::Storage(e.to_string()))?;
                Ok(Some(item.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update_if_status(
        &self,
        item: &QueueItem,
        expected: &[QueueStatus],
    ) -> Result<bool, QueueStoreError> {
        let mut items = self.write()?;
        let Some(stored) = items.get(&item.id) else {
            return Ok(false);
        };
        if !expected.contains(&stored.status) {
            return Ok(false);
        }
        if !item.status.is_terminal() {
            if let Some(live) = live_item_for(&items, item) {
                return Err(QueueStoreError::Conflict(format!(
                    "order {} already has live queue item {}",
                    item.order_id, live.id
                )));
            }
        }
        items.insert(item.id, item.clone());
        Ok(true)
    }

    async fn find_stale(
        &self,
        claimed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, QueueStoreError> {
        let items = self.read()?;
        let mut result: Vec<_> = items
            .values()
            .filter(|i| i.status == QueueStatus::Processing && i.updated_at < claimed_before)
            .cloned()
            .collect();
        result.sort_by_key(|i| i.updated_at);
        result.truncate(limit);
        Ok(result)
    }
}
