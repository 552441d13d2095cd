//! Batch dispatcher: claims eligible queue items, calls their supplier
//! adapter and records the outcome.
//!
//! One `process_queue` call is one cycle:
//!
//! 1. reap `processing` items whose claim went stale (worker crashed mid-call)
//! 2. select up to `batch_size` eligible items, oldest first
//! 3. claim each one atomically; a lost claim is skipped
//! 4. call the adapter (bounded concurrency) and transition the item
//! 5. append the matching event log entry
//!
//! Cycles hold no state between calls, so any number of dispatchers (or
//! external cron triggers) may run against the same store.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Span, debug, error, info, instrument, warn};

use orderflow_core::{DomainError, OrderId, QueueItemId};
use orderflow_fulfillment::{
    BackoffPolicy, EventLogEntry, FailureKind, FailureOutcome, QueueItem, QueueStatus,
    SupplierError, SupplierResult,
};
use orderflow_suppliers::AdapterRegistry;

use crate::event_log::EventLog;
use crate::store::{QueueStore, QueueStoreError};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Name for logging
    pub name: String,
    /// Items selected per cycle
    pub batch_size: usize,
    /// Concurrent adapter calls per cycle (defaults to the batch size)
    pub max_concurrent: Option<usize>,
    pub backoff: BackoffPolicy,
    /// Age after which a `processing` claim is considered abandoned
    pub stale_claim_after: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "dispatcher".to_string(),
            batch_size: 10,
            max_concurrent: None,
            backoff: BackoffPolicy::default(),
            stale_claim_after: Duration::from_secs(15 * 60),
        }
    }
}

impl DispatcherConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = Some(max.max(1));
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_stale_claim_after(mut self, after: Duration) -> Self {
        self.stale_claim_after = after;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] QueueStoreError),

    #[error("claimed item {queue_id} rejected transition: {source}")]
    Transition {
        queue_id: QueueItemId,
        #[source]
        source: DomainError,
    },
}

/// What happened to one claimed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Placed,
    RetryScheduled,
    Failed,
    /// The transition could not be written because the claim was taken
    /// away (e.g. reaped as stale) while the supplier call was running.
    ClaimLost,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemReport {
    pub queue_id: QueueItemId,
    pub order_id: OrderId,
    pub success: bool,
    pub outcome: ItemOutcome,
    pub status: QueueStatus,
    pub attempt: u32,
    pub detail: String,
}

/// Summary of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessReport {
    /// Items claimed and dispatched this cycle
    pub processed: usize,
    /// Selected items another worker (or a cancel) got to first
    pub skipped: usize,
    /// Stale claims moved to `failed`
    pub reaped: usize,
    pub results: Vec<ItemReport>,
}

/// Dispatcher runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatcherStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub processed: u64,
    pub placed: u64,
    pub retries_scheduled: u64,
    pub failed: u64,
    pub skipped: u64,
    pub reaped: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl DispatcherStats {
    fn record(&mut self, result: &Result<ProcessReport, DispatchError>, at: DateTime<Utc>) {
        self.cycles += 1;
        self.last_cycle_at = Some(at);
        match result {
            Ok(report) => {
                self.processed += report.processed as u64;
                self.skipped += report.skipped as u64;
                self.reaped += report.reaped as u64;
                for item in &report.results {
                    match item.outcome {
                        ItemOutcome::Placed => self.placed += 1,
                        ItemOutcome::RetryScheduled => self.retries_scheduled += 1,
                        ItemOutcome::Failed => self.failed += 1,
                        ItemOutcome::ClaimLost => {}
                    }
                }
            }
            Err(e) => {
                self.failed_cycles += 1;
                self.last_error = Some(e.to_string());
            }
        }
    }
}

/// Handle to control a running dispatcher loop.
#[derive(Debug)]
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<DispatcherStats>>,
}

impl DispatcherHandle {
    /// Stop after the current cycle (in-flight supplier calls are not cancelled).
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "dispatcher task ended abnormally");
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

/// Queue dispatcher.
pub struct Dispatcher<S, L> {
    store: S,
    events: L,
    adapters: Arc<AdapterRegistry>,
    config: DispatcherConfig,
}

impl<S: QueueStore, L: EventLog> Dispatcher<S, L> {
    pub fn new(store: S, events: L, adapters: Arc<AdapterRegistry>, config: DispatcherConfig) -> Self {
        Self {
            store,
            events,
            adapters,
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Run one dispatch cycle.
    ///
    /// `batch_size` overrides the configured batch size for this cycle.
    /// Store failures abort the cycle with an error; supplier failures never do.
    #[instrument(
        skip(self),
        fields(
            dispatcher = %self.config.name,
            processed = tracing::field::Empty,
            skipped = tracing::field::Empty,
            reaped = tracing::field::Empty
        ),
        err
    )]
    pub async fn process_queue(&self, batch_size: Option<usize>) -> Result<ProcessReport, DispatchError> {
        let batch_size = batch_size.unwrap_or(self.config.batch_size).max(1);
        let mut report = ProcessReport {
            reaped: self.reap_stale(batch_size).await?,
            ..Default::default()
        };

        let candidates = self.store.select_eligible(Utc::now(), batch_size).await?;
        if candidates.is_empty() {
            debug!("no eligible queue items");
            return Ok(report);
        }

        let concurrency = self.config.max_concurrent.unwrap_or(batch_size).max(1);
        let outcomes: Vec<Result<Option<ItemReport>, DispatchError>> = stream::iter(candidates)
            .map(|candidate| self.dispatch_one(candidate.id))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(Some(item)) => {
                    report.processed += 1;
                    report.results.push(item);
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    error!(error = %e, "queue item dispatch failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let span = Span::current();
        span.record("processed", report.processed);
        span.record("skipped", report.skipped);
        span.record("reaped", report.reaped);
        info!(
            processed = report.processed,
            skipped = report.skipped,
            reaped = report.reaped,
            "dispatch cycle finished"
        );
        Ok(report)
    }

    async fn dispatch_one(&self, id: QueueItemId) -> Result<Option<ItemReport>, DispatchError> {
        let Some(item) = self.store.claim(id, Utc::now()).await? else {
            debug!(queue_id = %id, "claim lost to another worker");
            return Ok(None);
        };

        debug!(
            queue_id = %item.id,
            order_id = %item.order_id,
            supplier = %item.supplier_type,
            attempt = item.attempt,
            "claimed queue item"
        );

        let request = item.placement_request();
        let outcome = AssertUnwindSafe(self.adapters.place_order(&request))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(SupplierError::Network("supplier adapter panicked".into())));

        let now = Utc::now();
        let report = match outcome {
            Ok(result) => self.record_success(item, result, now).await?,
            Err(err) => self.record_failure(item, err, now).await?,
        };
        Ok(Some(report))
    }

    async fn record_success(
        &self,
        mut item: QueueItem,
        result: SupplierResult,
        now: DateTime<Utc>,
    ) -> Result<ItemReport, DispatchError> {
        item.complete(result.to_json(), now)
            .map_err(|source| DispatchError::Transition { queue_id: item.id, source })?;
        let written = self.store.update_if_status(&item, &[QueueStatus::Processing]).await;

        // The order exists upstream either way, so the audit trail records it
        // even when the completion could not be stored.
        self.append_event(EventLogEntry::order_placed(&item, &result, now)).await;
        let written = written?;

        if !written {
            warn!(
                queue_id = %item.id,
                order_id = %item.order_id,
                supplier_order_id = %result.supplier_order_id,
                "order placed but claim was lost; item left as stored"
            );
            return Ok(claim_lost(&item, format!(
                "placed as {} but claim was lost",
                result.supplier_order_id
            )));
        }

        info!(
            queue_id = %item.id,
            order_id = %item.order_id,
            supplier = %item.supplier_type,
            supplier_order_id = %result.supplier_order_id,
            "order placed"
        );
        Ok(ItemReport {
            queue_id: item.id,
            order_id: item.order_id.clone(),
            success: true,
            outcome: ItemOutcome::Placed,
            status: item.status,
            attempt: item.attempt,
            detail: result.supplier_order_id,
        })
    }

    async fn record_failure(
        &self,
        mut item: QueueItem,
        err: SupplierError,
        now: DateTime<Utc>,
    ) -> Result<ItemReport, DispatchError> {
        let outcome = item
            .fail(&err, &self.config.backoff, now)
            .map_err(|source| DispatchError::Transition { queue_id: item.id, source })?;

        if !self.store.update_if_status(&item, &[QueueStatus::Processing]).await? {
            warn!(queue_id = %item.id, error = %err, "failure not recorded; claim was lost");
            return Ok(claim_lost(&item, err.to_string()));
        }

        let (entry, report_outcome) = match outcome {
            FailureOutcome::RetryScheduled {
                attempt,
                delay,
                next_eligible_at,
            } => {
                warn!(
                    queue_id = %item.id,
                    order_id = %item.order_id,
                    supplier = %item.supplier_type,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "supplier call failed; retry scheduled"
                );
                (
                    EventLogEntry::retry_scheduled(&item, &err, next_eligible_at, now),
                    ItemOutcome::RetryScheduled,
                )
            }
            FailureOutcome::Failed { attempt, kind } => {
                error!(
                    queue_id = %item.id,
                    order_id = %item.order_id,
                    supplier = %item.supplier_type,
                    attempt,
                    failure_kind = %kind,
                    error = %err,
                    "order placement failed"
                );
                (
                    EventLogEntry::order_failed(&item, kind, &err.to_string(), Some(err.code()), now),
                    ItemOutcome::Failed,
                )
            }
        };
        self.append_event(entry).await;

        Ok(ItemReport {
            queue_id: item.id,
            order_id: item.order_id.clone(),
            success: false,
            outcome: report_outcome,
            status: item.status,
            attempt: item.attempt,
            detail: err.to_string(),
        })
    }

    /// Fail `processing` items whose claim outlived `stale_claim_after`.
    async fn reap_stale(&self, limit: usize) -> Result<usize, DispatchError> {
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(self.config.stale_claim_after)
                .unwrap_or(chrono::Duration::MAX);
        let stale = self.store.find_stale(cutoff, limit).await?;

        let mut reaped = 0;
        for mut item in stale {
            item.interrupt(now)
                .map_err(|source| DispatchError::Transition { queue_id: item.id, source })?;
            if !self.store.update_if_status(&item, &[QueueStatus::Processing]).await? {
                continue;
            }
            warn!(
                queue_id = %item.id,
                order_id = %item.order_id,
                supplier = %item.supplier_type,
                "stale claim reaped; verify with supplier before retrying"
            );
            let message = item.last_error.clone().unwrap_or_default();
            self.append_event(EventLogEntry::order_failed(
                &item,
                FailureKind::Interrupted,
                &message,
                Some(FailureKind::Interrupted.as_str()),
                now,
            ))
            .await;
            reaped += 1;
        }
        Ok(reaped)
    }

    /// The transition is already durable; a lost audit entry is logged, not fatal.
    async fn append_event(&self, entry: EventLogEntry) {
        let queue_id = entry.queue_item_id;
        let event_type = entry.event_type;
        if let Err(e) = self.events.append(entry).await {
            warn!(queue_id = %queue_id, event_type = %event_type, error = %e, "failed to append event log entry");
        }
    }
}

impl<S, L> Dispatcher<S, L>
where
    S: QueueStore + 'static,
    L: EventLog + 'static,
{
    /// Run `process_queue` every `interval` until the handle is shut down.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> DispatcherHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(DispatcherStats::default()));
        let stats_task = stats.clone();

        let join = tokio::spawn(async move {
            info!(dispatcher = %self.config.name, interval_secs = interval.as_secs(), "dispatcher started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }

                let result = self.process_queue(None).await;
                if let Err(e) = &result {
                    error!(dispatcher = %self.config.name, error = %e, "dispatch cycle failed");
                }
                match stats_task.lock() {
                    Ok(mut s) => s.record(&result, Utc::now()),
                    Err(poisoned) => poisoned.into_inner().record(&result, Utc::now()),
                }
            }

            info!(dispatcher = %self.config.name, "dispatcher stopped");
        });

        DispatcherHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }
}

fn claim_lost(item: &QueueItem, detail: String) -> ItemReport {
    ItemReport {
        queue_id: item.id,
        order_id: item.order_id.clone(),
        success: false,
        outcome: ItemOutcome::ClaimLost,
        status: item.status,
        attempt: item.attempt,
        detail,
    }
}
