//! Auctionhouse Bus: a topic-routed message bus over a durable delivery log.
//!
//! Publishing stores one pending delivery per matching durable subscription.
//! Consumers claim only the oldest pending delivery of each aggregate, so
//! events of one aggregate reach a subscription in publish order while
//! different aggregates are handled concurrently. Redeliveries, dead letters
//! and not-yet-consumed events survive a restart.

pub mod durable;

pub use durable::{BusConfig, DeliveryReport, DurableBus};
