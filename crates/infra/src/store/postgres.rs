//! Postgres-backed queue store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | QueueStoreError | Scenario |
//! |------------|-----------------|-----------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Reopening an order that has a newer live item |
//! | Database (check violation) | `23514` | `Storage` | Row breaks a lifecycle constraint |
//! | Database (other) | Any other | `Storage` | Other database errors |
//! | PoolClosed / PoolTimedOut / Io / Tls | N/A | `Unavailable` | Database unreachable |
//! | Other | N/A | `Storage` | Anything else |
//!
//! ## Atomicity
//!
//! Every transition is a single conditional statement; the affected-row
//! count tells the caller whether it won. Idempotent enqueue relies on the
//! partial unique index `fulfillment_queue_one_live_per_order`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{Span, debug, instrument};
use uuid::Uuid;

use orderflow_core::{OrderId, OwnerId, QueueItemId};
use orderflow_fulfillment::{QueueItem, QueueStatus};

use super::{InsertOutcome, QueueFilter, QueueStore, QueueStoreError, StatusCounts};

/// Attempts at resolving an enqueue that neither inserted nor found a live row.
const INSERT_RETRIES: usize = 3;

#[derive(Debug, Clone)]
pub struct PostgresQueueStore {
    pool: Arc<PgPool>,
}

impl PostgresQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_live(&self, order_id: &OrderId) -> Result<Option<QueueItem>, QueueStoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                id, order_id, owner_id, supplier_type, status, attempt, max_attempts,
                payload, result, last_error, failure_kind, next_eligible_at,
                created_at, updated_at
            FROM fulfillment_queue
            WHERE order_id = $1 AND status IN ('pending', 'processing', 'retry')
            LIMIT 1
            "#,
        )
        .bind(order_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_live", e))?;

        row.map(|r| decode_row(&r)).transpose()
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    #[instrument(
        skip(self, item),
        fields(queue_id = %item.id, order_id = %item.order_id, outcome = tracing::field::Empty),
        err
    )]
    async fn insert_pending(&self, item: QueueItem) -> Result<InsertOutcome, QueueStoreError> {
        let span = Span::current();

        for _ in 0..INSERT_RETRIES {
            let inserted = sqlx::query(
                r#"
                INSERT INTO fulfillment_queue (
                    id, order_id, owner_id, supplier_type, status, attempt, max_attempts,
                    payload, result, last_error, failure_kind, next_eligible_at,
                    created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ON CONFLICT (order_id) WHERE status IN ('pending', 'processing', 'retry')
                DO NOTHING
                RETURNING id
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(item.order_id.as_str())
            .bind(item.owner_id.as_uuid())
            .bind(item.supplier_type.as_str())
            .bind(item.status.as_str())
            .bind(to_db_int(item.attempt))
            .bind(to_db_int(item.max_attempts))
            .bind(&item.payload)
            .bind(&item.result)
            .bind(&item.last_error)
            .bind(item.failure_kind.map(|k| k.as_str()))
            .bind(item.next_eligible_at)
            .bind(item.created_at)
            .bind(item.updated_at)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_pending", e))?;

            if inserted.is_some() {
                span.record("outcome", "inserted");
                return Ok(InsertOutcome::Inserted(item));
            }

            if let Some(existing) = self.find_live(&item.order_id).await? {
                span.record("outcome", "duplicate");
                return Ok(InsertOutcome::Duplicate(existing));
            }

            // The live row went terminal between the two statements.
            debug!("live item vanished during enqueue; retrying insert");
        }

        Err(QueueStoreError::Conflict(format!(
            "order {} is being modified concurrently",
            item.order_id
        )))
    }

    #[instrument(skip(self), fields(queue_id = %id), err)]
    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>, QueueStoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                id, order_id, owner_id, supplier_type, status, attempt, max_attempts,
                payload, result, last_error, failure_kind, next_eligible_at,
                created_at, updated_at
            FROM fulfillment_queue
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|r| decode_row(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>, QueueStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, order_id, owner_id, supplier_type, status, attempt, max_attempts,
                payload, result, last_error, failure_kind, next_eligible_at,
                created_at, updated_at
            FROM fulfillment_queue
            WHERE ($1::text IS NULL OR order_id = $1)
                AND ($2::uuid IS NULL OR owner_id = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(filter.order_id.as_ref().map(OrderId::as_str))
        .bind(filter.owner_id.map(Uuid::from))
        .bind(to_db_limit(filter.limit))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        rows.iter().map(decode_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn count_by_status(&self, filter: &QueueFilter) -> Result<StatusCounts, QueueStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS total
            FROM fulfillment_queue
            WHERE ($1::text IS NULL OR order_id = $1)
                AND ($2::uuid IS NULL OR owner_id = $2)
            GROUP BY status
            "#,
        )
        .bind(filter.order_id.as_ref().map(OrderId::as_str))
        .bind(filter.owner_id.map(Uuid::from))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_by_status", e))?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(corrupt)?;
            let total: i64 = row.try_get("total").map_err(corrupt)?;
            let status = status
                .parse::<QueueStatus>()
                .map_err(|e| QueueStoreError::Corrupt(e.to_string()))?;
            counts.add(status, u64::try_from(total).unwrap_or(0));
        }
        Ok(counts)
    }

    #[instrument(skip(self), fields(selected = tracing::field::Empty), err)]
    async fn select_eligible(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, QueueStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, order_id, owner_id, supplier_type, status, attempt, max_attempts,
                payload, result, last_error, failure_kind, next_eligible_at,
                created_at, updated_at
            FROM fulfillment_queue
            WHERE status = 'pending'
                OR (status = 'retry' AND next_eligible_at <= $1)
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(to_db_limit(limit))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("select_eligible", e))?;

        Span::current().record("selected", rows.len());
        rows.iter().map(decode_row).collect()
    }

    #[instrument(skip(self), fields(queue_id = %id, claimed = tracing::field::Empty), err)]
    async fn claim(
        &self,
        id: QueueItemId,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, QueueStoreError> {
        let row = sqlx::query(
            r#"
            UPDATE fulfillment_queue
            SET status = 'processing', updated_at = $2
            WHERE id = $1
                AND (status = 'pending' OR (status = 'retry' AND next_eligible_at <= $2))
            RETURNING
                id, order_id, owner_id, supplier_type, status, attempt, max_attempts,
                payload, result, last_error, failure_kind, next_eligible_at,
                created_at, updated_at
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim", e))?;

        Span::current().record("claimed", row.is_some());
        row.map(|r| decode_row(&r)).transpose()
    }

    #[instrument(
        skip(self, item),
        fields(queue_id = %item.id, status = %item.status, expected = ?expected),
        err
    )]
    async fn update_if_status(
        &self,
        item: &QueueItem,
        expected: &[QueueStatus],
    ) -> Result<bool, QueueStoreError> {
        let expected: Vec<&str> = expected.iter().map(QueueStatus::as_str).collect();

        let result = sqlx::query(
            r#"
            UPDATE fulfillment_queue
            SET status = $2,
                attempt = $3,
                max_attempts = $4,
                result = $5,
                last_error = $6,
                failure_kind = $7,
                next_eligible_at = $8,
                updated_at = $9
            WHERE id = $1 AND status = ANY($10)
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(item.status.as_str())
        .bind(to_db_int(item.attempt))
        .bind(to_db_int(item.max_attempts))
        .bind(&item.result)
        .bind(&item.last_error)
        .bind(item.failure_kind.map(|k| k.as_str()))
        .bind(item.next_eligible_at)
        .bind(item.updated_at)
        .bind(&expected)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_if_status", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    async fn find_stale(
        &self,
        claimed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, QueueStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, order_id, owner_id, supplier_type, status, attempt, max_attempts,
                payload, result, last_error, failure_kind, next_eligible_at,
                created_at, updated_at
            FROM fulfillment_queue
            WHERE status = 'processing' AND updated_at < $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
        )
        .bind(claimed_before)
        .bind(to_db_limit(limit))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_stale", e))?;

        rows.iter().map(decode_row).collect()
    }
}

fn to_db_int(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_db_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn corrupt(err: sqlx::Error) -> QueueStoreError {
    QueueStoreError::Corrupt(err.to_string())
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<QueueItem, QueueStoreError> {
    let parse = |column: &str, e: orderflow_core::DomainError| {
        QueueStoreError::Corrupt(format!("{column}: {e}"))
    };
    let unsigned = |column: &str, v: i32| {
        u32::try_from(v).map_err(|_| QueueStoreError::Corrupt(format!("{column}: negative value {v}")))
    };

    let order_id: String = row.try_get("order_id").map_err(corrupt)?;
    let supplier_type: String = row.try_get("supplier_type").map_err(corrupt)?;
    let status: String = row.try_get("status").map_err(corrupt)?;
    let failure_kind: Option<String> = row.try_get("failure_kind").map_err(corrupt)?;

    Ok(QueueItem {
        id: QueueItemId::from_uuid(row.try_get("id").map_err(corrupt)?),
        order_id: OrderId::new(order_id).map_err(|e| parse("order_id", e))?,
        owner_id: OwnerId::from_uuid(row.try_get("owner_id").map_err(corrupt)?),
        supplier_type: supplier_type.parse().map_err(|e| parse("supplier_type", e))?,
        status: status.parse().map_err(|e| parse("status", e))?,
        attempt: unsigned("attempt", row.try_get("attempt").map_err(corrupt)?)?,
        max_attempts: unsigned("max_attempts", row.try_get("max_attempts").map_err(corrupt)?)?,
        payload: row.try_get("payload").map_err(corrupt)?,
        result: row.try_get("result").map_err(corrupt)?,
        last_error: row.try_get("last_error").map_err(corrupt)?,
        failure_kind: failure_kind
            .map(|k| k.parse())
            .transpose()
            .map_err(|e| parse("failure_kind", e))?,
        next_eligible_at: row.try_get("next_eligible_at").map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
        updated_at: row.try_get("updated_at").map_err(corrupt)?,
    })
}

/// Map SQLx errors to QueueStoreError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> QueueStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => QueueStoreError::Conflict(msg),
                _ => QueueStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            QueueStoreError::Unavailable(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => QueueStoreError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => QueueStoreError::Unavailable(format!("tls error in {operation}: {e}")),
        other => QueueStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use orderflow_fulfillment::SupplierType;
    use serde_json::json;

    /// Connects to `ORDERFLOW_TEST_DATABASE_URL` when set; these tests are
    /// skipped otherwise.
    async fn test_store() -> Option<PostgresQueueStore> {
        let url = std::env::var("ORDERFLOW_TEST_DATABASE_URL").ok()?;
        let pool = db::connect(&url, 4).await.expect("connect to test database");
        db::run_migrations(&pool).await.expect("run migrations");
        Some(PostgresQueueStore::new(pool))
    }

    fn item(order: &str) -> QueueItem {
        QueueItem::new(
            OrderId::new(order).unwrap(),
            OwnerId::new(),
            SupplierType::Bigbuy,
            json!({"items": []}),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn enqueue_claim_and_complete_round_trip() {
        let Some(store) = test_store().await else {
            return;
        };
        let order = format!("pg-{}", Uuid::now_v7());

        let first = item(&order);
        assert!(matches!(
            store.insert_pending(first.clone()).await.unwrap(),
            InsertOutcome::Inserted(_)
        ));
        match store.insert_pending(item(&order)).await.unwrap() {
            InsertOutcome::Duplicate(existing) => assert_eq!(existing.id, first.id),
            other => panic!("expected duplicate, got {other:?}"),
        }

        let now = Utc::now();
        let mut claimed = store.claim(first.id, now).await.unwrap().unwrap();
        assert_eq!(claimed.status, QueueStatus::Processing);
        assert!(store.claim(first.id, now).await.unwrap().is_none());

        claimed.complete(json!({"supplier_order_id": "X"}), now).unwrap();
        assert!(store
            .update_if_status(&claimed, &[QueueStatus::Processing])
            .await
            .unwrap());
        assert!(!store
            .update_if_status(&claimed, &[QueueStatus::Processing])
            .await
            .unwrap());

        let stored = store.get(first.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Completed);
        assert_eq!(stored.result, Some(json!({"supplier_order_id": "X"})));
    }

    #[test]
    fn pool_timeouts_are_unavailable() {
        let err = map_sqlx_error("insert", sqlx::Error::PoolTimedOut);
        assert!(matches!(err, QueueStoreError::Unavailable(_)));
    }
}
