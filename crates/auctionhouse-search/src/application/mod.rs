//! Application layer for the Search context.

pub mod projector;
pub mod query_handlers;
