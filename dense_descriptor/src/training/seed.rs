//! Explicit seed derivation.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Seeds of a training run, derived from one base seed.
///
/// Training epoch `e` uses `base + e`; every validation pass uses `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochSeed {
    base: u64,
}

impl EpochSeed {
    /// Create from a base seed.
    pub fn new(base: u64) -> Self {
        Self { base }
    }

    /// Seed of training epoch `epoch`.
    pub fn training(&self, epoch: usize) -> u64 {
        self.base.wrapping_add(epoch as u64)
    }

    /// Seed of every validation pass.
    pub fn validation(&self) -> u64 {
        self.base
    }
}

/// Generator for sample `index` under `seed`.
///
/// Depends only on the pair, never on which worker draws the sample.
pub fn sample_rng(seed: u64, index: usize) -> StdRng {
    StdRng::seed_from_u64(splitmix64(seed ^ splitmix64(index as u64)))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_epoch_seeds() {
        let seeds = EpochSeed::new(10086);
        assert_eq!(seeds.training(3), 10089);
        assert_eq!(seeds.validation(), 10086);
    }

    #[test]
    fn test_sample_rng_is_reproducible() {
        let a: u64 = sample_rng(7, 12).gen();
        let b: u64 = sample_rng(7, 12).gen();
        let c: u64 = sample_rng(7, 13).gen();
        let d: u64 = sample_rng(8, 12).gen();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }
}
