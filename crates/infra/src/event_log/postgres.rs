//! Postgres-backed event log.
//!
//! The table rejects UPDATE/DELETE with a trigger; ordering within an item
//! follows the `seq` identity column, not timestamps.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use orderflow_core::{EventId, OrderId, QueueItemId};
use orderflow_fulfillment::EventLogEntry;

use super::{EventLog, EventLogError};

#[derive(Debug, Clone)]
pub struct PostgresEventLog {
    pool: Arc<PgPool>,
}

impl PostgresEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl EventLog for PostgresEventLog {
    #[instrument(
        skip(self, entry),
        fields(
            queue_id = %entry.queue_item_id,
            order_id = %entry.order_id,
            event_type = %entry.event_type
        ),
        err
    )]
    async fn append(&self, entry: EventLogEntry) -> Result<(), EventLogError> {
        sqlx::query(
            r#"
            INSERT INTO fulfillment_events (
                id, queue_item_id, order_id, event_type, event_data, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.queue_item_id.as_uuid())
        .bind(entry.order_id.as_str())
        .bind(entry.event_type.as_str())
        .bind(&entry.event_data)
        .bind(entry.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(queue_id = %queue_item_id), err)]
    async fn for_item(&self, queue_item_id: QueueItemId) -> Result<Vec<EventLogEntry>, EventLogError> {
        let rows = sqlx::query(
            r#"
            SELECT id, queue_item_id, order_id, event_type, event_data, created_at
            FROM fulfillment_events
            WHERE queue_item_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(queue_item_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("for_item", e))?;

        rows.iter().map(decode_row).collect()
    }
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<EventLogEntry, EventLogError> {
    let corrupt = |e: sqlx::Error| EventLogError::Corrupt(e.to_string());

    let order_id: String = row.try_get("order_id").map_err(corrupt)?;
    let event_type: String = row.try_get("event_type").map_err(corrupt)?;

    Ok(EventLogEntry {
        id: EventId::from_uuid(row.try_get("id").map_err(corrupt)?),
        queue_item_id: QueueItemId::from_uuid(row.try_get("queue_item_id").map_err(corrupt)?),
        order_id: OrderId::new(order_id).map_err(|e| EventLogError::Corrupt(e.to_string()))?,
        event_type: event_type
            .parse()
            .map_err(|e: orderflow_core::DomainError| EventLogError::Corrupt(e.to_string()))?,
        event_data: row.try_get("event_data").map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventLogError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => EventLogError::Duplicate(msg),
                _ => EventLogError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            EventLogError::Unavailable(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => EventLogError::Unavailable(format!("io error in {operation}: {e}")),
        other => EventLogError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
