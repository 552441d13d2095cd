//! Queue item and its lifecycle state machine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use orderflow_core::{DomainError, DomainResult, OrderId, OwnerId, QueueItemId};

use crate::backoff::BackoffPolicy;
use crate::supplier::{PlacementRequest, SupplierError, SupplierType};

/// Default ceiling on failed attempts before an item fails for good.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Queue item lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Waiting for its first dispatch (or reopened by an operator).
    Pending,
    /// Claimed by a dispatcher; a supplier call may be in flight.
    Processing,
    /// Placed with the supplier.
    Completed,
    /// Gave up; needs an operator.
    Failed,
    /// Waiting for `next_eligible_at` before another attempt.
    Retry,
    /// Withdrawn before any successful placement.
    Cancelled,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 6] = [
        QueueStatus::Pending,
        QueueStatus::Processing,
        QueueStatus::Completed,
        QueueStatus::Failed,
        QueueStatus::Retry,
        QueueStatus::Cancelled,
    ];

    /// Statuses that count against the one-live-item-per-order rule.
    pub const NON_TERMINAL: [QueueStatus; 3] = [
        QueueStatus::Pending,
        QueueStatus::Processing,
        QueueStatus::Retry,
    ];

    /// Statuses a dispatcher may claim from.
    pub const CLAIMABLE: [QueueStatus; 2] = [QueueStatus::Pending, QueueStatus::Retry];

    /// Statuses an owner may cancel from.
    pub const CANCELLABLE: [QueueStatus; 2] = [QueueStatus::Pending, QueueStatus::Retry];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Retry => "retry",
            QueueStatus::Cancelled => "cancelled",
        }
    }

    /// No automated process moves an item out of a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Cancelled
        )
    }
}

impl core::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for QueueStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown queue status: {s}")))
    }
}

/// Why a `failed` item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The supplier rejected the order (bad address, out of stock, credentials).
    Permanent,
    /// Transient failures kept happening until `max_attempts` ran out.
    Exhausted,
    /// The claim was abandoned mid-call; the order may or may not exist upstream.
    Interrupted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Permanent => "permanent",
            FailureKind::Exhausted => "exhausted",
            FailureKind::Interrupted => "interrupted",
        }
    }
}

impl core::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for FailureKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "permanent" => Ok(FailureKind::Permanent),
            "exhausted" => Ok(FailureKind::Exhausted),
            "interrupted" => Ok(FailureKind::Interrupted),
            other => Err(DomainError::validation(format!("unknown failure kind: {other}"))),
        }
    }
}

/// Result of recording a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    RetryScheduled {
        attempt: u32,
        delay: Duration,
        next_eligible_at: DateTime<Utc>,
    },
    Failed {
        attempt: u32,
        kind: FailureKind,
    },
}

/// One order-placement work unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub order_id: OrderId,
    pub owner_id: OwnerId,
    pub supplier_type: SupplierType,
    pub status: QueueStatus,
    /// Failed dispatch attempts so far.
    pub attempt: u32,
    pub max_attempts: u32,
    pub payload: JsonValue,
    pub result: Option<JsonValue>,
    /// Set only while `retry` or `failed`.
    pub last_error: Option<String>,
    /// Set only while `failed`.
    pub failure_kind: Option<FailureKind>,
    /// Set only while `retry`.
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    /// Create a new `pending` item.
    pub fn new(
        order_id: OrderId,
        owner_id: OwnerId,
        supplier_type: SupplierType,
        payload: JsonValue,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: QueueItemId::new(),
            order_id,
            owner_id,
            supplier_type,
            status: QueueStatus::Pending,
            attempt: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            payload,
            result: None,
            last_error: None,
            failure_kind: None,
            next_eligible_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Override the attempt ceiling (must be at least 1).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> DomainResult<Self> {
        if max_attempts == 0 {
            return Err(DomainError::validation("max_attempts must be at least 1"));
        }
        self.max_attempts = max_attempts;
        Ok(self)
    }

    /// Whether a dispatcher may pick this item up at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            QueueStatus::Pending => true,
            QueueStatus::Retry => self.next_eligible_at.is_none_or(|at| at <= now),
            _ => false,
        }
    }

    /// The adapter-facing view of this item.
    pub fn placement_request(&self) -> PlacementRequest {
        PlacementRequest {
            queue_item_id: self.id,
            order_id: self.order_id.clone(),
            owner_id: self.owner_id,
            supplier_type: self.supplier_type,
            payload: self.payload.clone(),
        }
    }

    /// `pending|retry → processing`.
    pub fn claim(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.is_eligible(now) {
            return Err(DomainError::invalid_transition("claim", self.status));
        }
        self.status = QueueStatus::Processing;
        self.updated_at = now;
        Ok(())
    }

    /// `processing → completed`.
    pub fn complete(&mut self, result: JsonValue, now: DateTime<Utc>) -> DomainResult<()> {
        self.require(QueueStatus::Processing, "complete")?;
        self.status = QueueStatus::Completed;
        self.result = Some(result);
        self.last_error = None;
        self.failure_kind = None;
        self.next_eligible_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// `processing → retry | failed`, depending on the error and attempts left.
    pub fn fail(
        &mut self,
        error: &SupplierError,
        policy: &BackoffPolicy,
        now: DateTime<Utc>,
    ) -> DomainResult<FailureOutcome> {
        self.require(QueueStatus::Processing, "record failure")?;

        self.attempt = self.attempt.saturating_add(1);
        self.last_error = Some(error.to_string());
        self.updated_at = now;

        if error.is_retryable() && self.attempt < self.max_attempts {
            let mut delay = policy.next_delay(self.attempt);
            if let Some(hint) = error.retry_after() {
                delay = delay.max(hint);
            }
            let next_eligible_at = now + to_chrono(delay);

            self.status = QueueStatus::Retry;
            self.failure_kind = None;
            self.next_eligible_at = Some(next_eligible_at);

            Ok(FailureOutcome::RetryScheduled {
                attempt: self.attempt,
                delay,
                next_eligible_at,
            })
        } else {
            let kind = if error.is_retryable() {
                FailureKind::Exhausted
            } else {
                FailureKind::Permanent
            };

            self.status = QueueStatus::Failed;
            self.failure_kind = Some(kind);
            self.next_eligible_at = None;

            Ok(FailureOutcome::Failed {
                attempt: self.attempt,
                kind,
            })
        }
    }

    /// `processing → failed (interrupted)` for a claim whose worker vanished.
    ///
    /// Never goes back to `retry`: the supplier call may have gone through.
    pub fn interrupt(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.require(QueueStatus::Processing, "interrupt")?;
        self.status = QueueStatus::Failed;
        self.failure_kind = Some(FailureKind::Interrupted);
        self.last_error = Some(
            "dispatch claim expired before completion; verify with the supplier before retrying"
                .to_string(),
        );
        self.next_eligible_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// `pending|retry → cancelled`.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if !QueueStatus::CANCELLABLE.contains(&self.status) {
            return Err(DomainError::invalid_transition("cancel", self.status));
        }
        self.status = QueueStatus::Cancelled;
        self.last_error = None;
        self.next_eligible_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// `failed → pending` (operator-initiated retry with a fresh attempt budget).
    pub fn reopen(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.require(QueueStatus::Failed, "retry")?;
        self.status = QueueStatus::Pending;
        self.attempt = 0;
        self.last_error = None;
        self.failure_kind = None;
        self.next_eligible_at = None;
        self.updated_at = now;
        Ok(())
    }

    fn require(&self, expected: QueueStatus, action: &'static str) -> DomainResult<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(action, self.status))
        }
    }
}

fn to_chrono(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX)
}
