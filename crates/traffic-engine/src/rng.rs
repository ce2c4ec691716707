//! Deterministic pseudo-random source.
//!
//! A single seed drives every randomized artifact (flow records, the
//! distribution sample stream, churn replacements), so a run is reproducible
//! end to end. Build-time artifacts draw from the root stream; each TX worker
//! derives its own stream from `(seed, queue_id)` so churn draws never share
//! state across cores.

use rand::rngs::SmallRng;
use rand::{Rng as _, SeedableRng};

pub struct Rng(SmallRng);

impl Rng {
    pub fn from_seed(seed: u64) -> Self {
        Self(SmallRng::seed_from_u64(seed))
    }

    /// Derived stream for one TX worker's churn draws.
    pub fn for_worker(seed: u64, queue_id: u16) -> Self {
        // Golden-ratio mix keeps adjacent queue ids from yielding adjacent
        // SmallRng states.
        Self::from_seed(seed ^ (u64::from(queue_id) + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15))
    }

    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        self.0.random()
    }

    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        self.0.random()
    }

    #[inline]
    pub fn next_u16(&mut self) -> u16 {
        self.0.random()
    }

    /// Uniform double in `[0, 1)`.
    #[inline]
    pub fn next_f64(&mut self) -> f64 {
        self.0.random()
    }
}
