//! Queue API: the operations callers (HTTP handlers, jobs) use to submit and
//! manage fulfillment requests.
//!
//! Every mutation is conditional on the stored status, so a call racing the
//! dispatcher either wins cleanly or reports the status it lost to.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use orderflow_core::{DomainError, OrderId, OwnerId, QueueItemId};
use orderflow_fulfillment::{
    DEFAULT_MAX_ATTEMPTS, EventLogEntry, QueueItem, QueueStatus, SupplierType,
};

use crate::event_log::{EventLog, EventLogError};
use crate::store::{InsertOutcome, QueueFilter, QueueStore, QueueStoreError, StatusCounts};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue item {0} not found")]
    NotFound(QueueItemId),

    #[error("queue item {id} cannot be cancelled from {status}")]
    NotCancellable { id: QueueItemId, status: QueueStatus },

    #[error("queue item {id} cannot be retried from {status}")]
    NotRetryable { id: QueueItemId, status: QueueStatus },

    #[error("order {order_id} is already queued as {queue_id}")]
    AlreadyQueued {
        order_id: OrderId,
        queue_id: QueueItemId,
    },

    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] QueueStoreError),

    #[error(transparent)]
    EventLog(#[from] EventLogError),
}

/// Input for [`QueueService::enqueue`].
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub order_id: OrderId,
    pub owner_id: OwnerId,
    pub supplier_type: SupplierType,
    pub payload: JsonValue,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Queued(QueueItem),
    /// The order already had a live item; nothing was written.
    Duplicate(QueueItem),
}

impl EnqueueOutcome {
    pub fn queue_id(&self) -> QueueItemId {
        self.item().id
    }

    pub fn item(&self) -> &QueueItem {
        match self {
            EnqueueOutcome::Queued(item) | EnqueueOutcome::Duplicate(item) => item,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, EnqueueOutcome::Duplicate(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub items: Vec<QueueItem>,
    pub stats: StatusCounts,
}

#[derive(Debug, Clone)]
pub struct QueueService<S, L> {
    store: S,
    events: L,
    default_max_attempts: u32,
}

impl<S: QueueStore, L: EventLog> QueueService<S, L> {
    pub fn new(store: S, events: L) -> Self {
        Self {
            store,
            events,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts.max(1);
        self
    }

    /// Submit an order for fulfillment.
    ///
    /// Idempotent per `order_id`: while a live item exists for the order the
    /// existing item comes back as [`EnqueueOutcome::Duplicate`].
    #[instrument(
        skip(self, request),
        fields(order_id = %request.order_id, owner_id = %request.owner_id, supplier = %request.supplier_type),
        err
    )]
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueOutcome, QueueError> {
        if !request.payload.is_object() {
            return Err(DomainError::validation("payload must be a JSON object").into());
        }

        let item = QueueItem::new(
            request.order_id,
            request.owner_id,
            request.supplier_type,
            request.payload,
            Utc::now(),
        )
        .with_max_attempts(request.max_attempts.unwrap_or(self.default_max_attempts))?;

        match self.store.insert_pending(item).await? {
            InsertOutcome::Inserted(item) => {
                info!(queue_id = %item.id, "order queued");
                Ok(EnqueueOutcome::Queued(item))
            }
            InsertOutcome::Duplicate(existing) => {
                info!(queue_id = %existing.id, status = %existing.status, "order already queued");
                Ok(EnqueueOutcome::Duplicate(existing))
            }
        }
    }

    /// Items visible to `owner_id` (optionally one order), newest first,
    /// plus per-status counts over the same filter.
    #[instrument(skip(self), err)]
    pub async fn get_status(
        &self,
        owner_id: OwnerId,
        order_id: Option<OrderId>,
    ) -> Result<StatusReport, QueueError> {
        let mut filter = QueueFilter::for_owner(owner_id);
        if let Some(order_id) = order_id {
            filter = filter.with_order(order_id);
        }

        let items = self.store.list(&filter).await?;
        let stats = self.store.count_by_status(&filter).await?;
        Ok(StatusReport { items, stats })
    }

    /// Single item, scoped to its owner.
    pub async fn get(&self, id: QueueItemId, owner_id: OwnerId) -> Result<QueueItem, QueueError> {
        self.owned(id, owner_id).await
    }

    /// `pending|retry → cancelled`.
    #[instrument(skip(self), fields(queue_id = %id), err)]
    pub async fn cancel(&self, id: QueueItemId, owner_id: OwnerId) -> Result<QueueItem, QueueError> {
        let mut item = self.owned(id, owner_id).await?;
        if item.cancel(Utc::now()).is_err() {
            return Err(QueueError::NotCancellable {
                id,
                status: item.status,
            });
        }

        if !self
            .store
            .update_if_status(&item, &QueueStatus::CANCELLABLE)
            .await?
        {
            // Lost to a dispatcher claim (or another cancel) in between.
            let current = self.owned(id, owner_id).await?;
            return Err(QueueError::NotCancellable {
                id,
                status: current.status,
            });
        }

        info!(order_id = %item.order_id, "queue item cancelled");
        self.append_event(EventLogEntry::cancelled(&item, item.updated_at))
            .await;
        Ok(item)
    }

    /// `failed → pending` with a fresh attempt budget.
    #[instrument(skip(self), fields(queue_id = %id), err)]
    pub async fn retry_now(&self, id: QueueItemId, owner_id: OwnerId) -> Result<QueueItem, QueueError> {
        let mut item = self.owned(id, owner_id).await?;
        let previous_attempt = item.attempt;
        if item.reopen(Utc::now()).is_err() {
            return Err(QueueError::NotRetryable {
                id,
                status: item.status,
            });
        }

        let written = match self
            .store
            .update_if_status(&item, &[QueueStatus::Failed])
            .await
        {
            Ok(written) => written,
            Err(QueueStoreError::Conflict(_)) => {
                return Err(self.already_queued(&item.order_id).await);
            }
            Err(e) => return Err(e.into()),
        };
        if !written {
            let current = self.owned(id, owner_id).await?;
            return Err(QueueError::NotRetryable {
                id,
                status: current.status,
            });
        }

        info!(order_id = %item.order_id, previous_attempt, "failed queue item requeued");
        self.append_event(EventLogEntry::requeued(&item, previous_attempt, item.updated_at))
            .await;
        Ok(item)
    }

    /// Event log entries for one item, in append order.
    #[instrument(skip(self), fields(queue_id = %id), err)]
    pub async fn history(
        &self,
        id: QueueItemId,
        owner_id: OwnerId,
    ) -> Result<Vec<EventLogEntry>, QueueError> {
        self.owned(id, owner_id).await?;
        Ok(self.events.for_item(id).await?)
    }

    /// Items owned by someone else are reported as missing.
    async fn owned(&self, id: QueueItemId, owner_id: OwnerId) -> Result<QueueItem, QueueError> {
        match self.store.get(id).await? {
            Some(item) if item.owner_id == owner_id => Ok(item),
            _ => Err(QueueError::NotFound(id)),
        }
    }

    async fn already_queued(&self, order_id: &OrderId) -> QueueError {
        let filter = QueueFilter::default().with_order(order_id.clone());
        match self.store.list(&filter).await {
            Ok(items) => match items.into_iter().find(|i| !i.status.is_terminal()) {
                Some(live) => QueueError::AlreadyQueued {
                    order_id: order_id.clone(),
                    queue_id: live.id,
                },
                None => QueueStoreError::Conflict(format!(
                    "order {order_id} gained and lost a live item concurrently"
                ))
                .into(),
            },
            Err(e) => e.into(),
        }
    }

    async fn append_event(&self, entry: EventLogEntry) {
        let queue_id = entry.queue_item_id;
        let event_type = entry.event_type;
        if let Err(e) = self.events.append(entry).await {
            warn!(queue_id = %queue_id, event_type = %event_type, error = %e, "failed to append event log entry");
        }
    }
}
