//! `PostgreSQL` implementation of the `DeliveryRepository` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use auctionhouse_core::bus::DeadLetter;
use auctionhouse_core::delivery::{Delivery, DeliveryRepository, DeliveryStatus};
use auctionhouse_core::error::DomainError;
use auctionhouse_core::event::IntegrationEvent;

use crate::persistence;

/// PostgreSQL-backed bus delivery log.
///
/// Subscriptions are rows in `bus_subscriptions`; publishing fans an event out
/// into `bus_deliveries` with one row per matching subscription. Claims use
/// `FOR UPDATE SKIP LOCKED` plus a lease on `next_attempt_at`, like the outbox.
#[derive(Debug, Clone)]
pub struct PgDeliveryRepository {
    pool: PgPool,
}

impl PgDeliveryRepository {
    /// Creates a new `PgDeliveryRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct DeliveryRow {
    position: i64,
    subscription: String,
    envelope: Json<IntegrationEvent>,
    status: String,
    deliveries: i32,
    next_attempt_at: DateTime<Utc>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    settled_at: Option<DateTime<Utc>>,
}

impl TryFrom<DeliveryRow> for Delivery {
    type Error = DomainError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            position: row.position,
            subscription: row.subscription,
            event: row.envelope.0,
            status: row.status.parse()?,
            deliveries: row.deliveries,
            next_attempt_at: row.next_attempt_at,
            last_error: row.last_error,
            created_at: row.created_at,
            settled_at: row.settled_at,
        })
    }
}

fn expect_one(affected: u64, subscription: &str, event_id: Uuid) -> Result<(), DomainError> {
    if affected == 0 {
        Err(DomainError::Persistence(format!(
            "delivery {event_id} for {subscription} not found or no longer pending"
        )))
    } else {
        Ok(())
    }
}

#[async_trait]
impl DeliveryRepository for PgDeliveryRepository {
    async fn register_subscription(
        &self,
        subscription: &str,
        event_types: &[&str],
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let event_types: Vec<String> = event_types.iter().map(|t| (*t).to_owned()).collect();
        sqlx::query(
            r"
            INSERT INTO bus_subscriptions (subscription, event_types, registered_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (subscription) DO UPDATE SET event_types = EXCLUDED.event_types
            ",
        )
        .bind(subscription)
        .bind(&event_types)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        Ok(())
    }

    async fn enqueue(&self, event: &IntegrationEvent, now: DateTime<Utc>) -> Result<usize, DomainError> {
        let result = sqlx::query(
            r"
            INSERT INTO bus_deliveries
                (subscription, event_id, event_type, aggregate_id, envelope,
                 status, deliveries, next_attempt_at, created_at)
            SELECT s.subscription, $1, $2, $3, $4, $5, 0, $6, $6
            FROM bus_subscriptions s
            WHERE $2 = ANY (s.event_types)
            ON CONFLICT (subscription, event_id) DO NOTHING
            ",
        )
        .bind(event.event_id)
        .bind(&event.event_type)
        .bind(event.aggregate_id)
        .bind(Json(event))
        .bind(DeliveryStatus::Pending.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }

    async fn claim_due(
        &self,
        subscription: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Delivery>, DomainError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, DeliveryRow>(
            r"
            WITH due AS (
                SELECT d.position
                FROM bus_deliveries d
                WHERE d.subscription = $1
                  AND d.status = 'pending'
                  AND d.next_attempt_at <= $2
                  AND NOT EXISTS (
                      SELECT 1 FROM bus_deliveries earlier
                      WHERE earlier.subscription = d.subscription
                        AND earlier.aggregate_id = d.aggregate_id
                        AND earlier.status = 'pending'
                        AND earlier.position < d.position
                  )
                ORDER BY d.position
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            UPDATE bus_deliveries
            SET next_attempt_at = $3
            FROM due
            WHERE bus_deliveries.position = due.position
            RETURNING bus_deliveries.position, bus_deliveries.subscription,
                      bus_deliveries.envelope, bus_deliveries.status,
                      bus_deliveries.deliveries, bus_deliveries.next_attempt_at,
                      bus_deliveries.last_error, bus_deliveries.created_at,
                      bus_deliveries.settled_at
            ",
        )
        .bind(subscription)
        .bind(now)
        .bind(lease_until)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        let mut deliveries = rows
            .into_iter()
            .map(Delivery::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        deliveries.sort_by_key(|delivery| delivery.position);
        Ok(deliveries)
    }

    async fn ack(&self, subscription: &str, event_id: Uuid, at: DateTime<Utc>) -> Result<(), DomainError> {
        let result = sqlx::query(
            r"
            UPDATE bus_deliveries
            SET status = $3, settled_at = $4
            WHERE subscription = $1 AND event_id = $2 AND status = 'pending'
            ",
        )
        .bind(subscription)
        .bind(event_id)
        .bind(DeliveryStatus::Acked.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        expect_one(result.rows_affected(), subscription, event_id)
    }

    async fn schedule_redelivery(
        &self,
        subscription: &str,
        event_id: Uuid,
        deliveries: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            r"
            UPDATE bus_deliveries
            SET deliveries = $3, next_attempt_at = $4, last_error = $5
            WHERE subscription = $1 AND event_id = $2 AND status = 'pending'
            ",
        )
        .bind(subscription)
        .bind(event_id)
        .bind(deliveries)
        .bind(next_attempt_at)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        expect_one(result.rows_affected(), subscription, event_id)
    }

    async fn dead_letter(
        &self,
        subscription: &str,
        event_id: Uuid,
        deliveries: i32,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            r"
            UPDATE bus_deliveries
            SET status = $3, deliveries = $4, last_error = $5, settled_at = $6
            WHERE subscription = $1 AND event_id = $2 AND status = 'pending'
            ",
        )
        .bind(subscription)
        .bind(event_id)
        .bind(DeliveryStatus::DeadLettered.as_str())
        .bind(deliveries)
        .bind(error)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        expect_one(result.rows_affected(), subscription, event_id)
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, DomainError> {
        let rows = sqlx::query_as::<_, DeliveryRow>(
            r"
            SELECT position, subscription, envelope, status, deliveries,
                   next_attempt_at, last_error, created_at, settled_at
            FROM bus_deliveries
            WHERE status = 'dead_lettered'
            ORDER BY position
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        rows.into_iter()
            .map(|row| Delivery::try_from(row).map(DeadLetter::from))
            .collect()
    }

    async fn purge_acked(&self, subscription: &str, before: DateTime<Utc>) -> Result<u64, DomainError> {
        let result = sqlx::query(
            "DELETE FROM bus_deliveries WHERE subscription = $1 AND status = 'acked' AND settled_at < $2",
        )
        .bind(subscription)
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        Ok(result.rows_affected())
    }
}
