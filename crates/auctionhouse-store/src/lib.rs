//! Auctionhouse Store: PostgreSQL persistence.
//!
//! One generic JSONB aggregate table with an optimistic version column, the
//! transactional outbox table written in the same transaction, a generic
//! projection table guarded by the last applied sequence number, and the
//! message bus delivery log.

pub mod pg_aggregate_store;
pub mod pg_delivery_repository;
pub mod pg_outbox_repository;
pub mod pg_projection_store;
pub mod schema;

fn persistence(e: sqlx::Error) -> auctionhouse_core::error::DomainError {
    auctionhouse_core::error::DomainError::Persistence(e.to_string())
}
