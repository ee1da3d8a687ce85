//! The 80-byte block header.

use crate::difficulty::{compact_to_target, hash_meets_target};
use crate::encode::{DecodeError, Reader};
use ember_hash::{sha256d, H256};
use serde::{Deserialize, Serialize};

pub const HEADER_SIZE: usize = 80;

#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Debug, Default)]
pub struct Header {
    pub version: i32,
    pub prev_block: H256,
    pub merkle_root: H256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.version.to_le_bytes());
        buf[4..36].copy_from_slice(self.prev_block.as_bytes());
        buf[36..68].copy_from_slice(self.merkle_root.as_bytes());
        buf[68..72].copy_from_slice(&self.time.to_le_bytes());
        buf[72..76].copy_from_slice(&self.bits.to_le_bytes());
        buf[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        buf
    }

    pub fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        Ok(Header {
            version: reader.read_i32()?,
            prev_block: reader.read_hash()?,
            merkle_root: reader.read_hash()?,
            time: reader.read_u32()?,
            bits: reader.read_u32()?,
            nonce: reader.read_u32()?,
        })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < HEADER_SIZE {
            return Err(DecodeError::UnexpectedEnd);
        }
        Self::decode(&mut Reader::new(&data[..HEADER_SIZE]))
    }

    pub fn hash(&self) -> H256 {
        sha256d(&self.encode())
    }

    /// Proof-of-work validity against this header's own compact target.
    pub fn verify_pow(&self) -> bool {
        match compact_to_target(self.bits) {
            Some(target) => hash_meets_target(&self.hash(), &target),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let header = Header {
            version: 4,
            prev_block: sha256d(b"prev"),
            merkle_root: sha256d(b"root"),
            time: 1_500_000_000,
            bits: 0x207fffff,
            nonce: 42,
        };
        let bytes = header.encode();
        assert_eq!(Header::from_bytes(&bytes).unwrap(), header);
        assert_eq!(header.hash(), sha256d(&bytes));
    }

    #[test]
    fn easy_target_pow() {
        // 0x207fffff allows almost any hash.
        let header = Header {
            bits: 0x207fffff,
            ..Default::default()
        };
        assert!(header.verify_pow());

        let hard = Header {
            bits: 0x03000001,
            ..Default::default()
        };
        assert!(!hard.verify_pow());
    }
}
