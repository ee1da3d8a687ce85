//! Merkle root over transaction hashes.
//!
//! The tree duplicates the last node at each odd level, matching the
//! consensus rule. An empty set yields the zero hash.

use crate::{sha256d_pair, H256};

pub fn merkle_root(hashes: &[H256]) -> H256 {
    if hashes.is_empty() {
        return H256::zero();
    }

    let mut level: Vec<H256> = hashes.to_vec();
    while level.len() > 1 {
        if level.len() & 1 == 1 {
            let last = *level.last().expect("non-empty level");
            level.push(last);
        }
        level = level
            .chunks(2)
            .map(|pair| sha256d_pair(&pair[0], &pair[1]))
            .collect();
    }
    level[0]
}

/// Merkle root over witness hashes, with the coinbase slot zeroed as the
/// commitment rules require.
pub fn witness_merkle_root(wtxids: &[H256]) -> H256 {
    let mut hashes = wtxids.to_vec();
    if let Some(first) = hashes.first_mut() {
        *first = H256::zero();
    }
    merkle_root(&hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sha256d;

    #[test]
    fn empty_is_zero() {
        assert_eq!(merkle_root(&[]), H256::zero());
    }

    #[test]
    fn single_is_identity() {
        let h = sha256d(b"tx");
        assert_eq!(merkle_root(&[h]), h);
    }

    #[test]
    fn odd_level_duplicates_last() {
        let a = sha256d(b"a");
        let b = sha256d(b"b");
        let c = sha256d(b"c");

        let ab = sha256d_pair(&a, &b);
        let cc = sha256d_pair(&c, &c);
        let expected = sha256d_pair(&ab, &cc);

        assert_eq!(merkle_root(&[a, b, c]), expected);
    }

    #[test]
    fn witness_root_zeroes_coinbase() {
        let cb = sha256d(b"coinbase");
        let tx = sha256d(b"tx");
        assert_eq!(
            witness_merkle_root(&[cb, tx]),
            merkle_root(&[H256::zero(), tx])
        );
    }
}
