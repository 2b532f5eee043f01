//! `PostgreSQL` implementation of the `AggregateStore` trait.

use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use auctionhouse_core::aggregate::AggregateRoot;
use auctionhouse_core::error::DomainError;
use auctionhouse_core::outbox::OutboxRecord;
use auctionhouse_core::repository::{AggregateStore, Mutation};

use crate::persistence;
use crate::pg_outbox_repository::insert_outbox_record;

/// PostgreSQL-backed aggregate store.
///
/// Aggregates are stored as JSONB next to their version. Every write checks the
/// version it expects and inserts the outbox records in the same transaction.
#[derive(Debug)]
pub struct PgAggregateStore<A> {
    pool: PgPool,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> Clone for PgAggregateStore<A> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _aggregate: PhantomData,
        }
    }
}

impl<A> PgAggregateStore<A> {
    /// Creates a new `PgAggregateStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _aggregate: PhantomData,
        }
    }
}

fn decode<A: AggregateRoot>(state: serde_json::Value) -> Result<A, DomainError> {
    serde_json::from_value(state)
        .map_err(|e| DomainError::Infrastructure(format!("state deserialization failed: {e}")))
}

fn encode<A: AggregateRoot>(aggregate: &A) -> Result<serde_json::Value, DomainError> {
    serde_json::to_value(aggregate)
        .map_err(|e| DomainError::Infrastructure(format!("state serialization failed: {e}")))
}

/// Explains why a version-guarded write touched no row.
async fn conflict_or_missing(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_type: &str,
    aggregate_id: Uuid,
    expected_version: i64,
) -> DomainError {
    let actual = sqlx::query_scalar::<_, i64>(
        "SELECT version FROM aggregates WHERE aggregate_type = $1 AND aggregate_id = $2",
    )
    .bind(aggregate_type)
    .bind(aggregate_id)
    .fetch_optional(&mut **tx)
    .await;

    match actual {
        Ok(Some(actual)) => DomainError::ConcurrencyConflict {
            aggregate_id,
            expected: expected_version,
            actual,
        },
        Ok(None) => DomainError::AggregateNotFound(aggregate_id),
        Err(e) => persistence(e),
    }
}

#[async_trait]
impl<A: AggregateRoot + 'static> AggregateStore<A> for PgAggregateStore<A> {
    async fn load(&self, id: Uuid) -> Result<Option<A>, DomainError> {
        sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT state FROM aggregates WHERE aggregate_type = $1 AND aggregate_id = $2",
        )
        .bind(A::AGGREGATE_TYPE)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?
        .map(decode)
        .transpose()
    }

    async fn load_all(&self) -> Result<Vec<A>, DomainError> {
        sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT state FROM aggregates WHERE aggregate_type = $1 ORDER BY aggregate_id",
        )
        .bind(A::AGGREGATE_TYPE)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?
        .into_iter()
        .map(decode)
        .collect()
    }

    async fn commit(
        &self,
        mutation: Mutation<'_, A>,
        outbox: &[OutboxRecord],
    ) -> Result<(), DomainError> {
        let aggregate_id = mutation.aggregate().aggregate_id();
        let mut tx = self.pool.begin().await.map_err(persistence)?;

        match mutation {
            Mutation::Create(aggregate) => {
                let inserted = sqlx::query(
                    r"
                    INSERT INTO aggregates (aggregate_type, aggregate_id, version, state)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (aggregate_type, aggregate_id) DO NOTHING
                    ",
                )
                .bind(A::AGGREGATE_TYPE)
                .bind(aggregate_id)
                .bind(aggregate.version())
                .bind(encode(aggregate)?)
                .execute(&mut *tx)
                .await
                .map_err(persistence)?;

                if inserted.rows_affected() == 0 {
                    return Err(
                        conflict_or_missing(&mut tx, A::AGGREGATE_TYPE, aggregate_id, 0).await,
                    );
                }
            }
            Mutation::Update {
                aggregate,
                expected_version,
            } => {
                let updated = sqlx::query(
                    r"
                    UPDATE aggregates
                    SET version = $3, state = $4, updated_at = NOW()
                    WHERE aggregate_type = $1 AND aggregate_id = $2 AND version = $5
                    ",
                )
                .bind(A::AGGREGATE_TYPE)
                .bind(aggregate_id)
                .bind(aggregate.version())
                .bind(encode(aggregate)?)
                .bind(expected_version)
                .execute(&mut *tx)
                .await
                .map_err(persistence)?;

                if updated.rows_affected() == 0 {
                    return Err(conflict_or_missing(
                        &mut tx,
                        A::AGGREGATE_TYPE,
                        aggregate_id,
                        expected_version,
                    )
                    .await);
                }
            }
            Mutation::Delete {
                expected_version, ..
            } => {
                let deleted = sqlx::query(
                    r"
                    DELETE FROM aggregates
                    WHERE aggregate_type = $1 AND aggregate_id = $2 AND version = $3
                    ",
                )
                .bind(A::AGGREGATE_TYPE)
                .bind(aggregate_id)
                .bind(expected_version)
                .execute(&mut *tx)
                .await
                .map_err(persistence)?;

                if deleted.rows_affected() == 0 {
                    return Err(conflict_or_missing(
                        &mut tx,
                        A::AGGREGATE_TYPE,
                        aggregate_id,
                        expected_version,
                    )
                    .await);
                }
            }
        }

        for record in outbox {
            insert_outbox_record(&mut tx, record).await?;
        }
        tx.commit().await.map_err(persistence)?;

        debug!(
            aggregate_type = A::AGGREGATE_TYPE,
            %aggregate_id,
            outbox_records = outbox.len(),
            "aggregate committed"
        );
        Ok(())
    }
}
