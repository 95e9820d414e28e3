//! Explicit pseudo-random keys.
//!
//! A [`Key`] is a plain value. Nothing draws from a shared global generator: whenever two
//! independent draws are needed, the key is split first and each child feeds one draw. The same
//! root seed therefore always yields the same parameters, no matter in which order the children
//! are consumed.

use ndarray_rand::rand::{SeedableRng, rngs::StdRng};

// Odd increment of SplitMix64 (the golden ratio scaled to 64 bits).
const GAMMA: u64 = 0x9e37_79b9_7f4a_7c15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key(u64);

impl Key {
    pub fn new(seed: u64) -> Key {
        Key(seed)
    }

    pub fn seed(self) -> u64 {
        self.0
    }

    /// Forks this key into two independent children.
    pub fn split(self) -> (Key, Key) {
        (self.child(0), self.child(1))
    }

    /// Forks this key into `n` independent children.
    pub fn split_n(self, n: usize) -> Vec<Key> {
        (0..n as u64).map(|index| self.child(index)).collect()
    }

    /// A generator seeded from this key. Drawing from it does not change the key.
    pub fn rng(self) -> StdRng {
        StdRng::seed_from_u64(self.0)
    }

    // The input `seed + (index + 1) * GAMMA` is distinct for every index because GAMMA is odd,
    // and mix64 is a bijection, so the children of one key never collide.
    fn child(self, index: u64) -> Key {
        let offset = index.wrapping_add(1).wrapping_mul(GAMMA);
        Key(mix64(self.0.wrapping_add(offset)))
    }
}

// SplitMix64 finalizer.
fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
