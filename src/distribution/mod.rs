//! Random LBA generation
//!
//! Produces uniformly distributed starting LBAs for the workload. Uses the
//! xoshiro256++ PRNG, which is fast and has good statistical properties;
//! this matters because one draw happens per IO.
//!
//! The draw goes through `gen_range`, which rejects rather than truncates,
//! so the distribution carries no modulo bias toward low addresses.

use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Uniform random LBA generator
///
/// Returns starting LBAs in the inclusive range `[0, nlba - block_lbas]`,
/// so every IO of `block_lbas` logical blocks fits inside the namespace.
pub struct LbaGenerator {
    rng: Xoshiro256PlusPlus,
    max_lba: u64,
}

impl LbaGenerator {
    /// Create a generator for a namespace of `nlba` logical blocks and IOs
    /// spanning `block_lbas` blocks, seeded from system entropy.
    ///
    /// If the namespace holds fewer blocks than one IO spans, every draw
    /// returns 0 (a degenerate but accepted configuration).
    pub fn new(nlba: u64, block_lbas: u64) -> Self {
        Self {
            rng: Xoshiro256PlusPlus::from_entropy(),
            max_lba: nlba.saturating_sub(block_lbas),
        }
    }

    /// Create a generator with a fixed seed, for reproducible tests
    pub fn with_seed(nlba: u64, block_lbas: u64, seed: u64) -> Self {
        Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            max_lba: nlba.saturating_sub(block_lbas),
        }
    }

    /// Draw the next starting LBA
    #[inline(always)]
    pub fn next_lba(&mut self) -> u64 {
        if self.max_lba == 0 {
            return 0;
        }
        self.rng.gen_range(0..=self.max_lba)
    }

    /// Largest LBA this generator can return
    pub fn max_lba(&self) -> u64 {
        self.max_lba
    }
}
