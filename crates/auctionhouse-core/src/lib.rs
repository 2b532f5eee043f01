//! Auctionhouse Core: shared domain abstractions.
//!
//! This crate defines the fundamental traits and types that every service
//! depends on: aggregates and their store, integration events, the
//! transactional outbox, the message bus contract and its delivery log, and
//! consumer-side projections. It contains no infrastructure code.

pub mod aggregate;
pub mod bus;
pub mod clock;
pub mod command;
pub mod delivery;
pub mod error;
pub mod event;
pub mod identity;
pub mod outbox;
pub mod projection;
pub mod repository;
pub mod retry;
pub mod rng;
