//! Rolling filter over recently rejected transaction ids.
//!
//! A stable bloom filter continuously evicts stale entries, the same
//! construction bitcoin's CRollingBloomFilter approximates. Sized for
//! roughly 120k ids at a one-in-a-million false-positive rate.

use bloom_filters::{BloomFilter, DefaultBuildHashKernels, StableBloomFilter};
use ember_hash::H256;
use std::collections::hash_map::RandomState;

const REJECT_FILTER_ITEMS: usize = 120_000;
const REJECT_FILTER_FP_RATE: f64 = 0.000_001;

pub struct RejectFilter {
    filter: StableBloomFilter<DefaultBuildHashKernels<RandomState>>,
}

impl RejectFilter {
    pub fn new() -> Self {
        RejectFilter {
            filter: Self::build(),
        }
    }

    fn build() -> StableBloomFilter<DefaultBuildHashKernels<RandomState>> {
        StableBloomFilter::new(
            REJECT_FILTER_ITEMS,
            3,
            REJECT_FILTER_FP_RATE,
            DefaultBuildHashKernels::new(rand::random(), RandomState::default()),
        )
    }

    pub fn insert(&mut self, hash: &H256) {
        self.filter.insert(hash);
    }

    pub fn contains(&self, hash: &H256) -> bool {
        self.filter.contains(hash)
    }

    /// Drop everything. Called on block connect: time-gated rules may have
    /// started holding.
    pub fn reset(&mut self) {
        self.filter = Self::build();
    }
}

impl Default for RejectFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_hash::sha256d;

    #[test]
    fn insert_and_reset() {
        let mut filter = RejectFilter::new();
        let hash = sha256d(b"junk");
        assert!(!filter.contains(&hash));
        filter.insert(&hash);
        assert!(filter.contains(&hash));
        filter.reset();
        assert!(!filter.contains(&hash));
    }
}
