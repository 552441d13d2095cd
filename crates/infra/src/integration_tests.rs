//! End-to-end queue scenarios over the in-memory stores.
//!
//! Pipeline: QueueService::enqueue → Dispatcher::process_queue → adapter →
//! QueueStore transition → EventLog.
//!
//! Supplier behaviour is scripted so each scenario controls exactly which
//! attempt fails and how.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use orderflow_core::{OrderId, OwnerId, QueueItemId};
use orderflow_fulfillment::{
    BackoffPolicy, EventLogEntry, EventType, FailureKind, PlacementRequest, QueueItem, QueueStatus,
    SupplierError, SupplierResult, SupplierType,
};
use orderflow_suppliers::{AdapterRegistry, GenericAdapter, SupplierAdapter};

use crate::dispatcher::{DispatchError, Dispatcher, DispatcherConfig, ItemOutcome};
use crate::event_log::{EventLog, EventLogError, InMemoryEventLog};
use crate::service::{EnqueueRequest, QueueError, QueueService};
use crate::store::{
    InMemoryQueueStore, InsertOutcome, QueueFilter, QueueStore, QueueStoreError, StatusCounts,
};

#[derive(Debug, Clone)]
enum Step {
    Succeed,
    Fail(SupplierError),
    Panic,
}

/// Adapter that plays back a script, then repeats `fallback`.
struct ScriptedAdapter {
    supplier: SupplierType,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    latency: Duration,
    calls: Mutex<HashMap<QueueItemId, usize>>,
}

impl ScriptedAdapter {
    fn new(supplier: SupplierType, script: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            supplier,
            script: Mutex::new(script.into()),
            fallback,
            latency: Duration::ZERO,
            calls: Mutex::new(HashMap::new()),
        })
    }

    fn always(supplier: SupplierType, step: Step) -> Arc<Self> {
        Self::new(supplier, Vec::new(), step)
    }

    fn slow(supplier: SupplierType, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            supplier,
            script: Mutex::new(VecDeque::new()),
            fallback: Step::Succeed,
            latency,
            calls: Mutex::new(HashMap::new()),
        })
    }

    fn calls_for(&self, id: QueueItemId) -> usize {
        self.calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl SupplierAdapter for ScriptedAdapter {
    fn supplier_type(&self) -> SupplierType {
        self.supplier
    }

    async fn place_order(&self, request: &PlacementRequest) -> Result<SupplierResult, SupplierError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        *self
            .calls
            .lock()
            .unwrap()
            .entry(request.queue_item_id)
            .or_default() += 1;

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::Succeed => Ok(SupplierResult::new(
                self.supplier,
                format!("SUP-{}", request.order_id),
            )
            .with_status("created")),
            Step::Fail(err) => Err(err),
            Step::Panic => panic!("scripted adapter panic"),
        }
    }
}

/// Event log that is always down.
struct BrokenEventLog;

#[async_trait]
impl EventLog for BrokenEventLog {
    async fn append(&self, _entry: EventLogEntry) -> Result<(), EventLogError> {
        Err(EventLogError::Unavailable("scripted outage".into()))
    }

    async fn for_item(&self, _id: QueueItemId) -> Result<Vec<EventLogEntry>, EventLogError> {
        Err(EventLogError::Unavailable("scripted outage".into()))
    }
}

/// Store whose transition writes fail while everything else works.
struct ReadOnlyStore(Arc<InMemoryQueueStore>);

#[async_trait]
impl QueueStore for ReadOnlyStore {
    async fn insert_pending(&self, item: QueueItem) -> Result<InsertOutcome, QueueStoreError> {
        self.0.insert_pending(item).await
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>, QueueStoreError> {
        self.0.get(id).await
    }

    async fn list(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>, QueueStoreError> {
        self.0.list(filter).await
    }

    async fn count_by_status(&self, filter: &QueueFilter) -> Result<StatusCounts, QueueStoreError> {
        self.0.count_by_status(filter).await
    }

    async fn select_eligible(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, QueueStoreError> {
        self.0.select_eligible(now, limit).await
    }

    async fn claim(
        &self,
        id: QueueItemId,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, QueueStoreError> {
        self.0.claim(id, now).await
    }

    async fn update_if_status(
        &self,
        _item: &QueueItem,
        _expected: &[QueueStatus],
    ) -> Result<bool, QueueStoreError> {
        Err(QueueStoreError::Unavailable("scripted write outage".into()))
    }

    async fn find_stale(
        &self,
        claimed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, QueueStoreError> {
        self.0.find_stale(claimed_before, limit).await
    }
}

type Store = Arc<InMemoryQueueStore>;
type Events = Arc<InMemoryEventLog>;

struct Harness {
    store: Store,
    events: Events,
    service: QueueService<Store, Events>,
    dispatcher: Arc<Dispatcher<Store, Events>>,
    owner: OwnerId,
}

fn no_wait() -> BackoffPolicy {
    BackoffPolicy::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
}

fn harness(registry: AdapterRegistry, config: DispatcherConfig) -> Harness {
    let store = InMemoryQueueStore::arc();
    let events = InMemoryEventLog::arc();
    Harness {
        service: QueueService::new(store.clone(), events.clone()),
        dispatcher: Arc::new(Dispatcher::new(
            store.clone(),
            events.clone(),
            Arc::new(registry),
            config,
        )),
        store,
        events,
        owner: OwnerId::new(),
    }
}

fn with_adapter(adapter: Arc<ScriptedAdapter>) -> Harness {
    let mut registry = AdapterRegistry::new();
    registry.register(adapter);
    harness(registry, DispatcherConfig::default().with_backoff(no_wait()))
}

impl Harness {
    async fn enqueue(&self, order: &str, supplier: SupplierType) -> QueueItemId {
        self.enqueue_with(order, supplier, None).await
    }

    async fn enqueue_with(
        &self,
        order: &str,
        supplier: SupplierType,
        max_attempts: Option<u32>,
    ) -> QueueItemId {
        self.service
            .enqueue(EnqueueRequest {
                order_id: OrderId::new(order).unwrap(),
                owner_id: self.owner,
                supplier_type: supplier,
                payload: json!({
                    "order_number": order,
                    "shipping": {
                        "name": "Ada Lovelace",
                        "address1": "12 Analytical Row",
                        "city": "London",
                        "zip": "N1 9GU",
                        "country_code": "GB",
                    },
                    "items": [{"sku": "SKU-1", "variant_id": "VID-1", "quantity": 1}],
                }),
                max_attempts,
            })
            .await
            .unwrap()
            .queue_id()
    }

    async fn item(&self, id: QueueItemId) -> orderflow_fulfillment::QueueItem {
        self.store.get(id).await.unwrap().unwrap()
    }

    async fn event_types(&self, id: QueueItemId) -> Vec<EventType> {
        self.events
            .for_item(id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }
}

#[tokio::test]
async fn timeouts_then_success_completes_after_two_retries() {
    let adapter = ScriptedAdapter::new(
        SupplierType::Cj,
        vec![
            Step::Fail(SupplierError::Timeout("read timed out".into())),
            Step::Fail(SupplierError::Timeout("read timed out".into())),
        ],
        Step::Succeed,
    );
    let h = with_adapter(adapter.clone());
    let id = h.enqueue("O1", SupplierType::Cj).await;

    let first = h.dispatcher.process_queue(None).await.unwrap();
    assert_eq!(first.processed, 1);
    assert_eq!(first.results[0].outcome, ItemOutcome::RetryScheduled);
    assert_eq!(h.item(id).await.status, QueueStatus::Retry);

    h.dispatcher.process_queue(None).await.unwrap();
    let last = h.dispatcher.process_queue(None).await.unwrap();
    assert!(last.results[0].success);
    assert_eq!(last.results[0].detail, "SUP-O1");

    let item = h.item(id).await;
    assert_eq!(item.status, QueueStatus::Completed);
    assert_eq!(item.attempt, 2);
    assert_eq!(item.result.as_ref().unwrap()["supplier_order_id"], "SUP-O1");
    assert!(item.next_eligible_at.is_none());
    assert_eq!(
        h.event_types(id).await,
        vec![
            EventType::RetryScheduled,
            EventType::RetryScheduled,
            EventType::OrderPlaced
        ]
    );
    assert_eq!(adapter.calls_for(id), 3);
}

#[tokio::test]
async fn invalid_address_fails_on_first_attempt() {
    let adapter = ScriptedAdapter::always(
        SupplierType::Cj,
        Step::Fail(SupplierError::InvalidAddress("invalid address".into())),
    );
    let h = with_adapter(adapter.clone());
    let id = h.enqueue("O2", SupplierType::Cj).await;

    let report = h.dispatcher.process_queue(None).await.unwrap();
    assert_eq!(report.results[0].outcome, ItemOutcome::Failed);

    let item = h.item(id).await;
    assert_eq!(item.status, QueueStatus::Failed);
    assert_eq!(item.attempt, 1);
    assert_eq!(item.failure_kind, Some(FailureKind::Permanent));
    assert!(item.last_error.unwrap().contains("invalid address"));

    let history = h.events.for_item(id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event_type, EventType::OrderFailed);
    assert_eq!(history[0].event_data["failure_kind"], "permanent");
    assert_eq!(history[0].event_data["error_code"], "invalid_address");

    // Terminal: later cycles leave it alone.
    assert_eq!(h.dispatcher.process_queue(None).await.unwrap().processed, 0);
    assert_eq!(adapter.total_calls(), 1);
}

#[tokio::test]
async fn retryable_failures_stop_at_max_attempts() {
    let adapter = ScriptedAdapter::always(
        SupplierType::Bigbuy,
        Step::Fail(SupplierError::Unavailable {
            status: 503,
            message: "maintenance".into(),
        }),
    );
    let h = with_adapter(adapter.clone());
    let id = h.enqueue_with("O3", SupplierType::Bigbuy, Some(3)).await;

    for _ in 0..5 {
        h.dispatcher.process_queue(None).await.unwrap();
    }

    let item = h.item(id).await;
    assert_eq!(item.status, QueueStatus::Failed);
    assert_eq!(item.attempt, 3);
    assert_eq!(item.failure_kind, Some(FailureKind::Exhausted));
    assert_eq!(adapter.calls_for(id), 3);
    assert_eq!(
        h.event_types(id).await,
        vec![
            EventType::RetryScheduled,
            EventType::RetryScheduled,
            EventType::OrderFailed
        ]
    );
}

#[tokio::test]
async fn cancelled_item_is_never_dispatched_and_cannot_be_retried() {
    let adapter = ScriptedAdapter::always(SupplierType::Cj, Step::Succeed);
    let h = with_adapter(adapter.clone());
    let id = h.enqueue("O4", SupplierType::Cj).await;

    h.service.cancel(id, h.owner).await.unwrap();
    assert_eq!(h.dispatcher.process_queue(None).await.unwrap().processed, 0);
    assert_eq!(adapter.total_calls(), 0);

    assert!(matches!(
        h.service.retry_now(id, h.owner).await,
        Err(QueueError::NotRetryable {
            status: QueueStatus::Cancelled,
            ..
        })
    ));
    assert_eq!(h.event_types(id).await, vec![EventType::Cancelled]);
}

#[tokio::test]
async fn completed_item_stays_completed() {
    let adapter = ScriptedAdapter::always(SupplierType::Cj, Step::Succeed);
    let h = with_adapter(adapter.clone());
    let id = h.enqueue("O5", SupplierType::Cj).await;
    h.dispatcher.process_queue(None).await.unwrap();

    assert!(matches!(
        h.service.cancel(id, h.owner).await,
        Err(QueueError::NotCancellable { .. })
    ));
    assert!(matches!(
        h.service.retry_now(id, h.owner).await,
        Err(QueueError::NotRetryable { .. })
    ));
    h.dispatcher.process_queue(None).await.unwrap();

    assert_eq!(h.item(id).await.status, QueueStatus::Completed);
    assert_eq!(adapter.calls_for(id), 1);
}

#[tokio::test]
async fn rate_limit_hint_delays_the_next_attempt() {
    let adapter = ScriptedAdapter::new(
        SupplierType::Bts,
        vec![Step::Fail(SupplierError::RateLimited {
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(120)),
        })],
        Step::Succeed,
    );
    let h = with_adapter(adapter.clone());
    let id = h.enqueue("O6", SupplierType::Bts).await;
    let before = Utc::now();

    h.dispatcher.process_queue(None).await.unwrap();
    let item = h.item(id).await;
    assert_eq!(item.status, QueueStatus::Retry);
    assert!(item.next_eligible_at.unwrap() >= before + chrono::Duration::seconds(120));

    assert_eq!(h.dispatcher.process_queue(None).await.unwrap().processed, 0);
    assert_eq!(adapter.calls_for(id), 1);
}

#[tokio::test]
async fn adapter_panic_is_a_retryable_failure() {
    let adapter = ScriptedAdapter::new(SupplierType::Cj, vec![Step::Panic], Step::Succeed);
    let h = with_adapter(adapter);
    let id = h.enqueue("O7", SupplierType::Cj).await;

    let report = h.dispatcher.process_queue(None).await.unwrap();
    assert_eq!(report.results[0].outcome, ItemOutcome::RetryScheduled);
    assert_eq!(h.item(id).await.status, QueueStatus::Retry);

    h.dispatcher.process_queue(None).await.unwrap();
    assert_eq!(h.item(id).await.status, QueueStatus::Completed);
}

#[tokio::test]
async fn unregistered_supplier_without_fallback_fails_permanently() {
    let h = with_adapter(ScriptedAdapter::always(SupplierType::Cj, Step::Succeed));
    let id = h.enqueue("O8", SupplierType::Aliexpress).await;

    h.dispatcher.process_queue(None).await.unwrap();
    let item = h.item(id).await;
    assert_eq!(item.status, QueueStatus::Failed);
    assert_eq!(item.failure_kind, Some(FailureKind::Permanent));
}

#[tokio::test]
async fn generic_fallback_completes_for_manual_placement() {
    let mut registry = AdapterRegistry::new();
    registry.register(GenericAdapter::new());
    let h = harness(registry, DispatcherConfig::default());
    let id = h.enqueue("O9", SupplierType::Aliexpress).await;

    h.dispatcher.process_queue(None).await.unwrap();
    let item = h.item(id).await;
    assert_eq!(item.status, QueueStatus::Completed);
    let result = item.result.unwrap();
    assert_eq!(result["supplier_order_id"], "MANUAL-O9");
    assert_eq!(result["status"], "manual_required");
}

#[tokio::test]
async fn batch_size_bounds_each_cycle() {
    let h = with_adapter(ScriptedAdapter::always(SupplierType::Cj, Step::Succeed));
    for n in 0..5 {
        h.enqueue(&format!("B-{n}"), SupplierType::Cj).await;
    }

    assert_eq!(h.dispatcher.process_queue(Some(2)).await.unwrap().processed, 2);
    assert_eq!(h.dispatcher.process_queue(Some(2)).await.unwrap().processed, 2);
    assert_eq!(h.dispatcher.process_queue(Some(2)).await.unwrap().processed, 1);

    let status = h.service.get_status(h.owner, None).await.unwrap();
    assert_eq!(status.stats.completed, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_dispatchers_place_each_order_once() {
    let adapter = ScriptedAdapter::slow(SupplierType::Cj, Duration::from_millis(5));
    let h = with_adapter(adapter.clone());
    let mut ids = Vec::new();
    for n in 0..20 {
        ids.push(h.enqueue(&format!("R-{n}"), SupplierType::Cj).await);
    }

    let mut workers = Vec::new();
    for _ in 0..8 {
        let dispatcher = h.dispatcher.clone();
        workers.push(tokio::spawn(async move {
            dispatcher.process_queue(Some(20)).await.unwrap()
        }));
    }
    let mut processed = 0;
    for worker in workers {
        processed += worker.await.unwrap().processed;
    }

    assert_eq!(processed, 20);
    for id in ids {
        assert_eq!(adapter.calls_for(id), 1);
        assert_eq!(h.item(id).await.status, QueueStatus::Completed);
        assert_eq!(h.event_types(id).await, vec![EventType::OrderPlaced]);
    }
}

#[tokio::test]
async fn stale_claim_is_reaped_and_can_be_requeued() {
    let adapter = ScriptedAdapter::always(SupplierType::Cj, Step::Succeed);
    let h = with_adapter(adapter.clone());
    let id = h.enqueue("S1", SupplierType::Cj).await;

    // A worker claimed it an hour ago and never came back.
    let claimed_at = Utc::now() - chrono::Duration::hours(1);
    h.store.claim(id, claimed_at).await.unwrap().unwrap();

    let report = h.dispatcher.process_queue(None).await.unwrap();
    assert_eq!(report.reaped, 1);
    assert_eq!(report.processed, 0);
    assert_eq!(adapter.total_calls(), 0);

    let item = h.item(id).await;
    assert_eq!(item.status, QueueStatus::Failed);
    assert_eq!(item.failure_kind, Some(FailureKind::Interrupted));

    h.service.retry_now(id, h.owner).await.unwrap();
    h.dispatcher.process_queue(None).await.unwrap();
    assert_eq!(h.item(id).await.status, QueueStatus::Completed);
    assert_eq!(
        h.event_types(id).await,
        vec![
            EventType::OrderFailed,
            EventType::Requeued,
            EventType::OrderPlaced
        ]
    );
}

#[tokio::test]
async fn fresh_claims_are_not_reaped() {
    let h = with_adapter(ScriptedAdapter::always(SupplierType::Cj, Step::Succeed));
    let id = h.enqueue("S2", SupplierType::Cj).await;
    h.store.claim(id, Utc::now()).await.unwrap().unwrap();

    let report = h.dispatcher.process_queue(None).await.unwrap();
    assert_eq!(report.reaped, 0);
    assert_eq!(h.item(id).await.status, QueueStatus::Processing);
}

#[tokio::test]
async fn event_log_outage_does_not_block_transitions() {
    let store = InMemoryQueueStore::arc();
    let mut registry = AdapterRegistry::new();
    registry.register(ScriptedAdapter::always(SupplierType::Cj, Step::Succeed));
    let dispatcher = Dispatcher::new(
        store.clone(),
        BrokenEventLog,
        Arc::new(registry),
        DispatcherConfig::default(),
    );
    let service = QueueService::new(store.clone(), BrokenEventLog);
    let owner = OwnerId::new();

    let id = service
        .enqueue(EnqueueRequest {
            order_id: OrderId::new("E1").unwrap(),
            owner_id: owner,
            supplier_type: SupplierType::Cj,
            payload: json!({"items": []}),
            max_attempts: None,
        })
        .await
        .unwrap()
        .queue_id();

    let report = dispatcher.process_queue(None).await.unwrap();
    assert!(report.results[0].success);
    assert_eq!(
        store.get(id).await.unwrap().unwrap().status,
        QueueStatus::Completed
    );
    assert!(matches!(
        service.history(id, owner).await,
        Err(QueueError::EventLog(_))
    ));
}

#[tokio::test]
async fn placement_is_logged_even_when_completion_cannot_be_stored() {
    let store = InMemoryQueueStore::arc();
    let events = InMemoryEventLog::arc();
    let mut registry = AdapterRegistry::new();
    registry.register(ScriptedAdapter::always(SupplierType::Cj, Step::Succeed));
    let dispatcher = Dispatcher::new(
        ReadOnlyStore(store.clone()),
        events.clone(),
        Arc::new(registry),
        DispatcherConfig::default(),
    );
    let service = QueueService::new(store.clone(), events.clone());

    let id = service
        .enqueue(EnqueueRequest {
            order_id: OrderId::new("W1").unwrap(),
            owner_id: OwnerId::new(),
            supplier_type: SupplierType::Cj,
            payload: json!({"items": []}),
            max_attempts: None,
        })
        .await
        .unwrap()
        .queue_id();

    let err = dispatcher.process_queue(None).await.unwrap_err();
    assert!(matches!(err, DispatchError::Store(QueueStoreError::Unavailable(_))));

    let logged: Vec<EventType> = events
        .for_item(id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(logged, vec![EventType::OrderPlaced]);
    assert_eq!(
        store.get(id).await.unwrap().unwrap().status,
        QueueStatus::Processing
    );
}

#[tokio::test]
async fn background_loop_dispatches_until_shutdown() {
    let h = with_adapter(ScriptedAdapter::always(SupplierType::Cj, Step::Succeed));
    let id = h.enqueue("L1", SupplierType::Cj).await;

    let handle = h.dispatcher.clone().spawn(Duration::from_millis(10));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while handle.stats().placed == 0 {
        assert!(tokio::time::Instant::now() < deadline, "item was never dispatched");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(h.item(id).await.status, QueueStatus::Completed);
    let stats = handle.stats();
    assert!(stats.cycles >= 1);
    assert_eq!(stats.placed, 1);
    assert_eq!(stats.failed_cycles, 0);
    handle.shutdown().await;
}
