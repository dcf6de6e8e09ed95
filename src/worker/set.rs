//! Approximate distinct counting for set metrics
//!
//! A bloom filter sized from (expected cardinality, accepted false-positive
//! rate), with the distinct count recovered from the fill ratio:
//!
//! ```text
//! estimate = -(m / k) * ln(1 - X / m)
//! ```
//!
//! where `m` is the bit count, `k` the hash count, and `X` the number of set
//! bits. Memory is fixed at `m` bits for the whole interval no matter how
//! many identities are inserted, and duplicate inserts set no new bits, so
//! they never raise the estimate. Identities are arbitrary byte strings.

use std::hash::{BuildHasher, Hasher};

use ahash::RandomState;

// Fixed seeds: the filter only has to be self-consistent within one process,
// and fixed seeds keep tests reproducible.
const SEED_A: (u64, u64, u64, u64) = (0x9e37_79b9, 0x7f4a_7c15, 0xf39c_c060, 0x5ced_1b53);
const SEED_B: (u64, u64, u64, u64) = (0x2545_f491, 0x4f6c_dd1d, 0x8a5c_d789, 0x63d1_ccf2);

/// Approximate-distinct-count accumulator for one flush interval.
pub struct SetEstimator {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
    set_bits: u64,
    hasher_a: RandomState,
    hasher_b: RandomState,
}

impl SetEstimator {
    /// Size the filter for `expected` distinct identities at false-positive
    /// rate `accuracy` (e.g. 0.01). Larger `expected` or smaller `accuracy`
    /// grows the table and lowers the estimation error.
    pub fn new(expected: u32, accuracy: f64) -> Self {
        let n = f64::from(expected.max(1));
        let p = accuracy.clamp(1e-9, 0.5);

        let ln2 = std::f64::consts::LN_2;
        let num_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as u32;

        SetEstimator {
            bits: vec![0u64; num_bits.div_ceil(64) as usize],
            num_bits,
            num_hashes,
            set_bits: 0,
            hasher_a: RandomState::with_seeds(SEED_A.0, SEED_A.1, SEED_A.2, SEED_A.3),
            hasher_b: RandomState::with_seeds(SEED_B.0, SEED_B.1, SEED_B.2, SEED_B.3),
        }
    }

    /// Insert one opaque identity.
    pub fn insert(&mut self, identity: &[u8]) {
        let a = self.hash_with(&self.hasher_a, identity);
        // force odd so the probe stride never collapses to zero
        let b = self.hash_with(&self.hasher_b, identity) | 1;

        for i in 0..self.num_hashes {
            let bit = a.wrapping_add(u64::from(i).wrapping_mul(b)) % self.num_bits;
            let word = (bit / 64) as usize;
            let mask = 1u64 << (bit % 64);
            if self.bits[word] & mask == 0 {
                self.bits[word] |= mask;
                self.set_bits += 1;
            }
        }
    }

    /// Estimated count of distinct identities inserted so far.
    pub fn estimate(&self) -> f64 {
        if self.set_bits == 0 {
            return 0.0;
        }
        if self.set_bits >= self.num_bits {
            // saturated filter; the inversion formula diverges here
            return self.num_bits as f64;
        }
        let m = self.num_bits as f64;
        let x = self.set_bits as f64;
        (-(m / f64::from(self.num_hashes)) * (1.0 - x / m).ln()).round()
    }

    fn hash_with(&self, state: &RandomState, identity: &[u8]) -> u64 {
        let mut hasher = state.build_hasher();
        hasher.write(identity);
        hasher.finish()
    }
}
