//! Database schema.
//!
//! The SQL lives in `migrations/` at the workspace root and is embedded here
//! at compile time.

use sqlx::migrate::Migrator;

/// Migrations for the aggregate, outbox, projection and bus delivery tables.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

