//! Fulfillment queue domain: queue item lifecycle, retry backoff, supplier
//! vocabulary and audit events.
//!
//! Everything here is pure (no IO). Storage lives in `orderflow-infra`,
//! network calls in `orderflow-suppliers`.
//!
//! ## Lifecycle
//!
//! ```text
//! pending --claim--> processing --success--> completed
//! pending|retry --claim--> processing --retryable failure, attempts left--> retry
//! processing --permanent failure / attempts exhausted / stale claim--> failed
//! pending|retry --cancel--> cancelled
//! failed --retry_now--> pending
//! ```

pub mod backoff;
pub mod event;
pub mod queue_item;
pub mod supplier;

pub use backoff::BackoffPolicy;
pub use event::{EventLogEntry, EventType};
pub use queue_item::{
    DEFAULT_MAX_ATTEMPTS, FailureKind, FailureOutcome, QueueItem, QueueStatus,
};
pub use supplier::{
    OrderLine, OrderPayload, PlacementRequest, ShippingAddress, SupplierError, SupplierResult,
    SupplierType,
};
