//! Auctionhouse Search: Search bounded context.
//!
//! Owns a local, denormalized copy of every auction, built only from the
//! integration events the Auction context publishes. It never reads the
//! auction service's store.

pub mod application;
pub mod domain;
