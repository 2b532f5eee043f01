//! `PostgreSQL` implementation of the `ProjectionStore` trait.

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use uuid::Uuid;

use auctionhouse_core::error::DomainError;
use auctionhouse_core::projection::{ApplyOutcome, ProjectionChange, ProjectionStore};

use crate::persistence;

/// PostgreSQL-backed projection store.
///
/// All projections share one table, partitioned by `projection` name. The
/// sequence guard is part of the upsert itself, so a duplicate or stale event
/// never overwrites newer state even with concurrent consumers.
#[derive(Debug)]
pub struct PgProjectionStore<P> {
    pool: PgPool,
    projection: &'static str,
    _document: PhantomData<fn() -> P>,
}

impl<P> Clone for PgProjectionStore<P> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            projection: self.projection,
            _document: PhantomData,
        }
    }
}

impl<P> PgProjectionStore<P> {
    /// Creates a store for the projection named `projection`.
    #[must_use]
    pub fn new(pool: PgPool, projection: &'static str) -> Self {
        Self {
            pool,
            projection,
            _document: PhantomData,
        }
    }
}

fn decode<P: DeserializeOwned>(document: serde_json::Value) -> Result<P, DomainError> {
    serde_json::from_value(document)
        .map_err(|e| DomainError::Infrastructure(format!("document deserialization failed: {e}")))
}

#[async_trait]
impl<P> ProjectionStore<P> for PgProjectionStore<P>
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn apply(
        &self,
        aggregate_id: Uuid,
        sequence_number: i64,
        change: ProjectionChange<P>,
    ) -> Result<ApplyOutcome, DomainError> {
        let document = match change {
            ProjectionChange::Upsert(document) => Some(serde_json::to_value(document).map_err(
                |e| DomainError::Infrastructure(format!("document serialization failed: {e}")),
            )?),
            ProjectionChange::Remove => None,
        };

        let mut tx = self.pool.begin().await.map_err(persistence)?;
        let written = sqlx::query(
            r"
            INSERT INTO projections (projection, aggregate_id, last_sequence, document)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (projection, aggregate_id) DO UPDATE
            SET last_sequence = EXCLUDED.last_sequence,
                document = EXCLUDED.document,
                updated_at = NOW()
            WHERE projections.last_sequence < EXCLUDED.last_sequence
            ",
        )
        .bind(self.projection)
        .bind(aggregate_id)
        .bind(sequence_number)
        .bind(document)
        .execute(&mut *tx)
        .await
        .map_err(persistence)?;

        let outcome = if written.rows_affected() > 0 {
            ApplyOutcome::Applied
        } else {
            let last = sqlx::query_scalar::<_, i64>(
                "SELECT last_sequence FROM projections WHERE projection = $1 AND aggregate_id = $2",
            )
            .bind(self.projection)
            .bind(aggregate_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(persistence)?;
            ApplyOutcome::classify(last, sequence_number)
        };
        tx.commit().await.map_err(persistence)?;

        Ok(outcome)
    }

    async fn get(&self, aggregate_id: Uuid) -> Result<Option<P>, DomainError> {
        sqlx::query_scalar::<_, Option<serde_json::Value>>(
            "SELECT document FROM projections WHERE projection = $1 AND aggregate_id = $2",
        )
        .bind(self.projection)
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?
        .flatten()
        .map(decode)
        .transpose()
    }

    async fn list(&self) -> Result<Vec<P>, DomainError> {
        sqlx::query_scalar::<_, serde_json::Value>(
            r"
            SELECT document FROM projections
            WHERE projection = $1 AND document IS NOT NULL
            ORDER BY aggregate_id
            ",
        )
        .bind(self.projection)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?
        .into_iter()
        .map(decode)
        .collect()
    }

    async fn last_sequence(&self, aggregate_id: Uuid) -> Result<Option<i64>, DomainError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT last_sequence FROM projections WHERE projection = $1 AND aggregate_id = $2",
        )
        .bind(self.projection)
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)
    }
}
