//! Shared test mocks and utilities for the Auctionhouse services.

mod bus;
mod clock;
mod delivery;
mod projection;
mod rng;
mod store;

pub use bus::{RecordingBus, RecordingHandler};
pub use clock::{FixedClock, ManualClock};
pub use delivery::InMemoryDeliveryStore;
pub use projection::{FailingProjectionStore, InMemoryProjectionStore};
pub use rng::MockRng;
pub use store::{FailingAggregateStore, InMemoryStore};
