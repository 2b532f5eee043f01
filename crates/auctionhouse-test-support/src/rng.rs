//! Test RNG: deterministic `DeterministicRng` implementation for tests.

use auctionhouse_core::rng::DeterministicRng;

/// A no-op RNG that always returns `0.0`, so backoff delays carry no jitter.
#[derive(Debug)]
pub struct MockRng;

impl DeterministicRng for MockRng {
    fn next_f64(&mut self) -> f64 {
        0.0
    }
}
