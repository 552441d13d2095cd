//! Append-only audit trail of queue outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use orderflow_core::{DomainError, EventId, OrderId, QueueItemId};

use crate::queue_item::{FailureKind, QueueItem};
use crate::supplier::{SupplierError, SupplierResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    OrderPlaced,
    RetryScheduled,
    OrderFailed,
    Cancelled,
    Requeued,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::OrderPlaced,
        EventType::RetryScheduled,
        EventType::OrderFailed,
        EventType::Cancelled,
        EventType::Requeued,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderPlaced => "order_placed",
            EventType::RetryScheduled => "retry_scheduled",
            EventType::OrderFailed => "order_failed",
            EventType::Cancelled => "cancelled",
            EventType::Requeued => "requeued",
        }
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for EventType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown event type: {s}")))
    }
}

/// One immutable row of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: EventId,
    pub queue_item_id: QueueItemId,
    pub order_id: OrderId,
    pub event_type: EventType,
    pub event_data: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl EventLogEntry {
    pub fn new(
        item: &QueueItem,
        event_type: EventType,
        event_data: JsonValue,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            queue_item_id: item.id,
            order_id: item.order_id.clone(),
            event_type,
            event_data,
            created_at,
        }
    }

    pub fn order_placed(item: &QueueItem, result: &SupplierResult, at: DateTime<Utc>) -> Self {
        Self::new(
            item,
            EventType::OrderPlaced,
            json!({
                "supplier": result.supplier,
                "supplier_order_id": result.supplier_order_id,
                "supplier_order_number": result.supplier_order_number,
                "attempt": item.attempt,
            }),
            at,
        )
    }

    pub fn retry_scheduled(
        item: &QueueItem,
        error: &SupplierError,
        next_eligible_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            item,
            EventType::RetryScheduled,
            json!({
                "attempt": item.attempt,
                "error": error.to_string(),
                "error_code": error.code(),
                "next_eligible_at": next_eligible_at,
            }),
            at,
        )
    }

    pub fn order_failed(
        item: &QueueItem,
        kind: FailureKind,
        error: &str,
        error_code: Option<&str>,
        at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            item,
            EventType::OrderFailed,
            json!({
                "attempt": item.attempt,
                "failure_kind": kind,
                "error": error,
                "error_code": error_code,
            }),
            at,
        )
    }

    pub fn cancelled(item: &QueueItem, at: DateTime<Utc>) -> Self {
        Self::new(
            item,
            EventType::Cancelled,
            json!({ "owner_id": item.owner_id, "attempt": item.attempt }),
            at,
        )
    }

    pub fn requeued(item: &QueueItem, previous_attempt: u32, at: DateTime<Utc>) -> Self {
        Self::new(
            item,
            EventType::Requeued,
            json!({ "owner_id": item.owner_id, "previous_attempt": previous_attempt }),
            at,
        )
    }
}
