//! Route modules organized by bounded context.

pub mod auctions;
pub mod health;
pub mod search;
