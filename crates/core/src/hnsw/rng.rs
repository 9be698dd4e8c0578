//! Level sampling for new HNSW nodes.
//!
//! The index never reads a global random source; a [`RandomGenerator`] is
//! injected at construction so fixed-seed builds are reproducible.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of uniform samples used to assign node levels.
pub trait RandomGenerator: Send {
    /// Next sample, uniform in `[0, 1)`.
    fn next_uniform(&mut self) -> f64;
}

/// [`RandomGenerator`] backed by a seeded [`StdRng`].
#[derive(Debug, Clone)]
pub struct SeededRandom {
    rng: StdRng,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Non-reproducible generator seeded from the OS.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl RandomGenerator for SeededRandom {
    fn next_uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Draw a level as `floor(-ln(U) * level_lambda)`, capped at `max_layers - 1`.
///
/// `U = 0` would make the logarithm infinite; it is replaced by the smallest
/// positive `f64`.
pub fn draw_level(rng: &mut dyn RandomGenerator, level_lambda: f64, max_layers: usize) -> usize {
    let u = rng.next_uniform();
    let u = if u > 0.0 { u } else { f64::MIN_POSITIVE };
    let level = (-u.ln() * level_lambda).floor();
    // Negative or NaN samples saturate to 0.
    (level as usize).min(max_layers.saturating_sub(1))
}
