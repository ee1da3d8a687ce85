//! Fixed-size hashes and the hashing primitives shared by the whole node.
//!
//! Block and transaction identity is double-SHA256 over the consensus
//! serialization. Hashes are kept in chain-internal (little-endian) byte
//! order; `Display` prints the conventional reversed hex form.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

mod merkle;

pub use merkle::{merkle_root, witness_merkle_root};

/// A 32-byte hash in chain-internal byte order.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct H256(pub [u8; 32]);

impl H256 {
    pub fn zero() -> Self {
        H256([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() != 32 {
            return None;
        }
        let mut inner = [0u8; 32];
        inner.copy_from_slice(slice);
        Some(H256(inner))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The hash with its byte order flipped, e.g. for RPC display or
    /// longpoll ids.
    pub fn reversed(&self) -> H256 {
        let mut inner = self.0;
        inner.reverse();
        H256(inner)
    }

    /// Parse the conventional reversed hex form.
    pub fn from_rev_hex(s: &str) -> Option<Self> {
        let raw = hex::decode(s).ok()?;
        Self::from_slice(&raw).map(|h| h.reversed())
    }

    /// The conventional reversed hex form.
    pub fn to_rev_hex(&self) -> String {
        hex::encode(self.reversed().0)
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_rev_hex())
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "H256({})", self.to_rev_hex())
    }
}

impl From<[u8; 32]> for H256 {
    fn from(inner: [u8; 32]) -> Self {
        H256(inner)
    }
}

/// Single SHA256.
pub fn sha256(data: &[u8]) -> H256 {
    let digest: [u8; 32] = Sha256::digest(data).into();
    H256(digest)
}

/// Double SHA256, the consensus hash function.
pub fn sha256d(data: &[u8]) -> H256 {
    let first: [u8; 32] = Sha256::digest(data).into();
    let second: [u8; 32] = Sha256::digest(first).into();
    H256(second)
}

/// Double SHA256 over the concatenation of two hashes.
pub fn sha256d_pair(left: &H256, right: &H256) -> H256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(&left.0);
    buf[32..].copy_from_slice(&right.0);
    sha256d(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256d_empty() {
        // Well-known double-SHA256 of the empty string.
        let hash = sha256d(b"");
        assert_eq!(
            hex::encode(hash.0),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn rev_hex_round_trip() {
        let hash = sha256d(b"ember");
        let hex = hash.to_rev_hex();
        assert_eq!(H256::from_rev_hex(&hex), Some(hash));
        assert_eq!(hash.reversed().reversed(), hash);
    }

    #[test]
    fn from_slice_rejects_bad_length() {
        assert!(H256::from_slice(&[0u8; 31]).is_none());
        assert!(H256::from_slice(&[0u8; 33]).is_none());
    }
}
