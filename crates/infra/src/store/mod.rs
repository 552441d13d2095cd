//! Queue store boundary.
//!
//! The store is the source of truth for queue item lifecycle. Every
//! transition is a compare-and-swap on the stored status, so concurrent
//! dispatchers and API calls can race safely:
//!
//! - `claim` only succeeds from `pending` or eligible `retry`
//! - `update_if_status` only writes when the stored status is one of the
//!   expected ones
//! - at most one non-terminal item exists per `order_id`

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use orderflow_core::{OrderId, OwnerId, QueueItemId};
use orderflow_fulfillment::{QueueItem, QueueStatus};

pub use in_memory::InMemoryQueueStore;
pub use postgres::PostgresQueueStore;

/// Default page size for listings.
pub const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueStoreError {
    /// A write would break the one-live-item-per-order rule.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The backing store could not be reached.
    #[error("queue store unavailable: {0}")]
    Unavailable(String),
    /// A stored row could not be decoded.
    #[error("corrupt queue row: {0}")]
    Corrupt(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result of an idempotent insert.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(QueueItem),
    /// A non-terminal item for the same order already exists.
    Duplicate(QueueItem),
}

/// Filter for listings and counts. Set fields are ANDed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFilter {
    pub order_id: Option<OrderId>,
    pub owner_id: Option<OwnerId>,
    pub limit: usize,
}

impl Default for QueueFilter {
    fn default() -> Self {
        Self {
            order_id: None,
            owner_id: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl QueueFilter {
    pub fn for_owner(owner_id: OwnerId) -> Self {
        Self {
            owner_id: Some(owner_id),
            ..Default::default()
        }
    }

    pub fn with_order(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, item: &QueueItem) -> bool {
        self.order_id.as_ref().is_none_or(|o| &item.order_id == o)
            && self.owner_id.is_none_or(|o| item.owner_id == o)
    }
}

/// Per-status item counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub retry: u64,
    pub cancelled: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: QueueStatus, n: u64) {
        let slot = match status {
            QueueStatus::Pending => &mut self.pending,
            QueueStatus::Processing => &mut self.processing,
            QueueStatus::Completed => &mut self.completed,
            QueueStatus::Failed => &mut self.failed,
            QueueStatus::Retry => &mut self.retry,
            QueueStatus::Cancelled => &mut self.cancelled,
        };
        *slot += n;
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed + self.retry + self.cancelled
    }
}

/// Durable record of queue items.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new (normally `pending`) item unless the order already has
    /// a non-terminal one. Atomic with respect to concurrent inserts.
    async fn insert_pending(&self, item: QueueItem) -> Result<InsertOutcome, QueueStoreError>;

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>, QueueStoreError>;

    /// Items matching `filter`, newest first.
    async fn list(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>, QueueStoreError>;

    /// Counts over every item matching `filter` (ignores `limit`).
    async fn count_by_status(&self, filter: &QueueFilter) -> Result<StatusCounts, QueueStoreError>;

    /// Up to `limit` dispatchable items, oldest first.
    async fn select_eligible(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, QueueStoreError>;

    /// Atomically move an eligible item to `processing`.
    ///
    /// `None` means the item was no longer claimable (another worker won,
    /// it was cancelled, or its retry is not due yet).
    async fn claim(
        &self,
        id: QueueItemId,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, QueueStoreError>;

    /// Persist `item` only if the stored status is one of `expected`.
    ///
    /// Returns `false` when the stored status no longer matches.
    async fn update_if_status(
        &self,
        item: &QueueItem,
        expected: &[QueueStatus],
    ) -> Result<bool, QueueStoreError>;

    /// `processing` items last touched before `claimed_before`.
    async fn find_stale(
        &self,
        claimed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, QueueStoreError>;
}

#[async_trait]
impl<T: QueueStore + ?Sized> QueueStore for Arc<T> {
    async fn insert_pending(&self, item: QueueItem) -> Result<InsertOutcome, QueueStoreError> {
        (**self).insert_pending(item).await
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>, QueueStoreError> {
        (**self).get(id).await
    }

    async fn list(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>, QueueStoreError> {
        (**self).list(filter).await
    }

    async fn count_by_status(&self, filter: &QueueFilter) -> Result<StatusCounts, QueueStoreError> {
        (**self).count_by_status(filter).await
    }

    async fn select_eligible(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, QueueStoreError> {
        (**self).select_eligible(now, limit).await
    }

    async fn claim(
        &self,
        id: QueueItemId,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, QueueStoreError> {
        (**self).claim(id, now).await
    }

    async fn update_if_status(
        &self,
        item: &QueueItem,
        expected: &[QueueStatus],
    ) -> Result<bool, QueueStoreError> {
        (**self).update_if_status(item, expected).await
    }

    async fn find_stale(
        &self,
        claimed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, QueueStoreError> {
        (**self).find_stale(claimed_before, limit).await
    }
}
