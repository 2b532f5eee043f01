//! Application layer for the Auction context.

pub mod command_handlers;
pub mod query_handlers;
