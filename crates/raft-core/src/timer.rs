//! # timer
//!
//! why: spread election timeouts so nodes rarely time out together
//! relations: owned by runtime.rs, sized from config.rs
//! what: ElectionTimer with a seedable rng

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Randomized election timeouts drawn from a per-node rng.
///
/// Seeding makes a node's sequence of timeouts reproducible in tests.
#[derive(Debug)]
pub struct ElectionTimer {
    base_ms: u64,
    rng: StdRng,
}

impl ElectionTimer {
    pub fn new(base_ms: u64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { base_ms, rng }
    }

    /// Next timeout, uniform in `[base, 2 * base)` milliseconds
    pub fn next_timeout(&mut self) -> Duration {
        let upper = self.base_ms.saturating_mul(2).saturating_sub(1).max(self.base_ms);
        let ms = self.rng.gen_range(self.base_ms..=upper);
        Duration::from_millis(ms)
    }
}
