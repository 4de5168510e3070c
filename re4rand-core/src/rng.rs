//! Seeded random stream shared by every randomisation pass.
//!
//! The generator is ChaCha8 seeded from a `u64`, so the same seed yields the
//! same sequence on every platform and every build. Subsystems that must not
//! perturb each other take a [`RandomStream::fork`] at the start of a run.

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{RandomiserError, Result};

#[derive(Clone, Debug)]
pub struct RandomStream {
    inner: ChaCha8Rng,
}

impl RandomStream {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Derives an independent child stream. Consumes exactly one draw from
    /// `self`, so the position of a fork relative to other draws matters.
    pub fn fork(&mut self) -> RandomStream {
        RandomStream::new(self.next_u64())
    }

    pub fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    /// Uniform scalar in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }

    /// Uniform integer in `[lo, hi]`. An inverted range yields `lo`.
    pub fn next_int(&mut self, lo: i64, hi: i64) -> i64 {
        if hi <= lo {
            return lo;
        }
        self.inner.gen_range(lo..=hi)
    }

    /// Uniform float in `[lo, hi)`. An empty range yields `lo`.
    pub fn next_float(&mut self, lo: f64, hi: f64) -> f64 {
        if hi <= lo {
            return lo;
        }
        lo + (hi - lo) * self.next_f64()
    }

    /// True with the given chance, expressed in percent.
    pub fn probability(&mut self, percent: f64) -> bool {
        self.next_f64() * 100.0 < percent
    }

    pub fn choice<'a, T>(&mut self, items: &'a [T]) -> Result<&'a T> {
        if items.is_empty() {
            return Err(RandomiserError::PreconditionViolation(
                "choice from an empty sequence".to_string(),
            ));
        }
        let idx = self.inner.gen_range(0..items.len());
        Ok(&items[idx])
    }

    /// In-place Fisher-Yates shuffle driven by this stream.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        let mut i = items.len();
        while i > 1 {
            i -= 1;
            let j = self.inner.gen_range(0..=i);
            if i != j {
                items.swap(i, j);
            }
        }
    }
}
