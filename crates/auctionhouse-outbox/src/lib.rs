//! Auctionhouse Outbox: moves committed outbox records onto the message bus.
//!
//! Writers only ever insert outbox records inside their own store transaction
//! (see `auctionhouse_core::outbox::publish_with_mutation`). The dispatcher in
//! this crate is the only component that talks to the bus on their behalf.

pub mod dispatcher;

pub use dispatcher::{DispatchReport, DispatcherConfig, OutboxDispatcher};
