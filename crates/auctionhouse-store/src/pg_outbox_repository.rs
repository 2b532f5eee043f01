//! `PostgreSQL` implementation of the `OutboxRepository` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use auctionhouse_core::error::DomainError;
use auctionhouse_core::event::IntegrationEvent;
use auctionhouse_core::outbox::{OutboxRecord, OutboxRepository, OutboxStatus};

use crate::persistence;

/// PostgreSQL-backed outbox.
///
/// Claims use `FOR UPDATE SKIP LOCKED` plus a lease on `next_attempt_at`, so
/// several dispatcher instances can share one table without sending a record
/// twice while its lease holds.
#[derive(Debug, Clone)]
pub struct PgOutboxRepository {
    pool: PgPool,
}

impl PgOutboxRepository {
    /// Creates a new `PgOutboxRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct OutboxRow {
    position: i64,
    event_id: Uuid,
    event_type: String,
    schema_version: i32,
    aggregate_type: String,
    aggregate_id: Uuid,
    sequence_number: i64,
    correlation_id: Uuid,
    causation_id: Uuid,
    occurred_at: DateTime<Utc>,
    payload: serde_json::Value,
    status: String,
    attempts: i32,
    next_attempt_at: DateTime<Utc>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    dispatched_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxRecord {
    type Error = DomainError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        Ok(Self {
            event: IntegrationEvent {
                event_id: row.event_id,
                event_type: row.event_type,
                schema_version: row.schema_version,
                aggregate_type: row.aggregate_type,
                aggregate_id: row.aggregate_id,
                sequence_number: row.sequence_number,
                correlation_id: row.correlation_id,
                causation_id: row.causation_id,
                occurred_at: row.occurred_at,
                payload: row.payload,
            },
            position: row.position,
            status: row.status.parse()?,
            attempts: row.attempts,
            next_attempt_at: row.next_attempt_at,
            last_error: row.last_error,
            created_at: row.created_at,
            dispatched_at: row.dispatched_at,
        })
    }
}

/// Inserts `record` inside the caller's transaction.
pub(crate) async fn insert_outbox_record(
    tx: &mut Transaction<'_, Postgres>,
    record: &OutboxRecord,
) -> Result<(), DomainError> {
    let event = &record.event;
    sqlx::query(
        r"
        INSERT INTO outbox
            (event_id, event_type, schema_version, aggregate_type, aggregate_id,
             sequence_number, correlation_id, causation_id, occurred_at, payload,
             status, attempts, next_attempt_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ",
    )
    .bind(event.event_id)
    .bind(&event.event_type)
    .bind(event.schema_version)
    .bind(&event.aggregate_type)
    .bind(event.aggregate_id)
    .bind(event.sequence_number)
    .bind(event.correlation_id)
    .bind(event.causation_id)
    .bind(event.occurred_at)
    .bind(&event.payload)
    .bind(record.status.as_str())
    .bind(record.attempts)
    .bind(record.next_attempt_at)
    .bind(record.created_at)
    .execute(&mut **tx)
    .await
    .map_err(persistence)?;

    Ok(())
}

fn expect_one(affected: u64, id: Uuid) -> Result<(), DomainError> {
    if affected == 0 {
        Err(DomainError::Persistence(format!(
            "outbox record {id} not found or no longer pending"
        )))
    } else {
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for PgOutboxRepository {
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, DomainError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, OutboxRow>(
            r"
            WITH due AS (
                SELECT o.position
                FROM outbox o
                WHERE o.status = 'pending'
                  AND o.next_attempt_at <= $1
                  AND NOT EXISTS (
                      SELECT 1 FROM outbox earlier
                      WHERE earlier.aggregate_id = o.aggregate_id
                        AND earlier.status = 'pending'
                        AND earlier.position < o.position
                  )
                ORDER BY o.position
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox
            SET next_attempt_at = $2
            FROM due
            WHERE outbox.position = due.position
            RETURNING outbox.position, outbox.event_id, outbox.event_type,
                      outbox.schema_version, outbox.aggregate_type, outbox.aggregate_id,
                      outbox.sequence_number, outbox.correlation_id, outbox.causation_id,
                      outbox.occurred_at, outbox.payload, outbox.status, outbox.attempts,
                      outbox.next_attempt_at, outbox.last_error, outbox.created_at,
                      outbox.dispatched_at
            ",
        )
        .bind(now)
        .bind(lease_until)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        let mut records = rows
            .into_iter()
            .map(OutboxRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by_key(|record| record.position);
        Ok(records)
    }

    async fn mark_dispatched(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DomainError> {
        let result = sqlx::query(
            "UPDATE outbox SET status = $2, dispatched_at = $3 WHERE event_id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(OutboxStatus::Dispatched.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        expect_one(result.rows_affected(), id)
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            r"
            UPDATE outbox
            SET attempts = $2, next_attempt_at = $3, last_error = $4
            WHERE event_id = $1 AND status = 'pending'
            ",
        )
        .bind(id)
        .bind(attempts)
        .bind(next_attempt_at)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        expect_one(result.rows_affected(), id)
    }

    async fn dead_letter(&self, id: Uuid, attempts: i32, error: &str) -> Result<(), DomainError> {
        let result = sqlx::query(
            r"
            UPDATE outbox
            SET status = $2, attempts = $3, last_error = $4
            WHERE event_id = $1 AND status = 'pending'
            ",
        )
        .bind(id)
        .bind(OutboxStatus::DeadLettered.as_str())
        .bind(attempts)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        expect_one(result.rows_affected(), id)
    }

    async fn purge_dispatched(&self, before: DateTime<Utc>) -> Result<u64, DomainError> {
        let result = sqlx::query(
            "DELETE FROM outbox WHERE status = 'dispatched' AND dispatched_at < $1",
        )
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        Ok(result.rows_affected())
    }
}
