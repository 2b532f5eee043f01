//! Domain model for the Auction context.

pub mod aggregates;
pub mod commands;
pub mod events;
