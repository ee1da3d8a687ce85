//! Consensus serialization helpers.
//!
//! Little-endian integers and the compact-size prefix shared by every wire
//! and persistent format in the node.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DecodeError {
    #[error("unexpected end of data")]
    UnexpectedEnd,
    #[error("non-canonical compact size")]
    NonCanonicalSize,
    #[error("size {0} exceeds limit")]
    OversizedField(u64),
    #[error("{0}")]
    Malformed(&'static str),
}

/// Byte reader over a slice, tracking the cursor.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEnd);
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(LittleEndian::read_u16(self.read_bytes(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(LittleEndian::read_u32(self.read_bytes(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(LittleEndian::read_u64(self.read_bytes(8)?))
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(LittleEndian::read_i32(self.read_bytes(4)?))
    }

    pub fn read_hash(&mut self) -> Result<ember_hash::H256, DecodeError> {
        let bytes = self.read_bytes(32)?;
        Ok(ember_hash::H256::from_slice(bytes).expect("32 bytes"))
    }

    /// Read a compact-size prefix, rejecting non-minimal encodings.
    pub fn read_compact_size(&mut self) -> Result<u64, DecodeError> {
        let first = self.read_u8()?;
        let value = match first {
            0..=0xfc => u64::from(first),
            0xfd => {
                let v = u64::from(self.read_u16()?);
                if v < 0xfd {
                    return Err(DecodeError::NonCanonicalSize);
                }
                v
            }
            0xfe => {
                let v = u64::from(self.read_u32()?);
                if v <= u64::from(u16::MAX) {
                    return Err(DecodeError::NonCanonicalSize);
                }
                v
            }
            0xff => {
                let v = self.read_u64()?;
                if v <= u64::from(u32::MAX) {
                    return Err(DecodeError::NonCanonicalSize);
                }
                v
            }
        };
        Ok(value)
    }

    /// Read a compact-size prefixed byte vector bounded by `limit`.
    pub fn read_var_bytes(&mut self, limit: usize) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_compact_size()?;
        if len > limit as u64 {
            return Err(DecodeError::OversizedField(len));
        }
        Ok(self.read_bytes(len as usize)?.to_vec())
    }
}

pub fn write_compact_size(buf: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => buf.push(value as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
}

pub fn write_var_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_compact_size(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Serialized length of a compact-size prefix.
pub fn compact_size_len(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}
