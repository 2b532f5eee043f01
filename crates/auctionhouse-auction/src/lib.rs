//! Auctionhouse: Auction bounded context.
//!
//! Owns the `Auction` aggregate and its embedded `Item`. Every externally
//! visible change is committed together with an integration event in the
//! transactional outbox.

pub mod application;
pub mod domain;
