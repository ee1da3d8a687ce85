//! Core data types of the ember node.
//!
//! Everything here is pure data plus consensus serialization: transactions,
//! blocks, headers, coins and the coin viewpoint used during verification.
//! Script *introspection* (opcode walking, sigop counting) lives here too;
//! script execution and signature math are capabilities supplied by the
//! embedding node.

pub mod block;
pub mod coins;
pub mod difficulty;
pub mod encode;
pub mod header;
pub mod script;
pub mod service;
pub mod transaction;

use ember_hash::{sha256d, H256};

/// Block height.
pub type BlockNumber = u32;

/// 21 million, in satoshis.
pub const MAX_MONEY: u64 = 21_000_000 * 100_000_000;

/// Blocks before a coinbase output may be spent.
pub const COINBASE_MATURITY: u32 = 100;

/// Weight units per virtual byte.
pub const WITNESS_SCALE_FACTOR: u64 = 4;

/// Consensus cap on block weight.
pub const MAX_BLOCK_WEIGHT: u64 = 4_000_000;

/// Consensus cap on sigop cost per block.
pub const MAX_BLOCK_SIGOPS_COST: u64 = 80_000;

/// Consensus cap on sigop cost for a single transaction.
pub const MAX_TX_SIGOPS_COST: u64 = MAX_BLOCK_SIGOPS_COST / 5;

/// Policy cap on the weight of a relayed transaction.
pub const MAX_TX_WEIGHT: u64 = 400_000;

/// Locktime values below this are heights, above are unix times.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Sequence number that opts a transaction out of BIP125 replacement
/// signalling and out of BIP68 relative locks.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// The magic prefix for signed messages.
pub const SIGN_MESSAGE_MAGIC: &str = "Bitcoin Signed Message:\n";

/// The digest a message signature commits to: double-SHA256 over the magic
/// and the message, both with compact-size length prefixes.
pub fn signed_message_hash(message: &[u8]) -> H256 {
    let mut buf = Vec::with_capacity(SIGN_MESSAGE_MAGIC.len() + message.len() + 10);
    encode::write_compact_size(&mut buf, SIGN_MESSAGE_MAGIC.len() as u64);
    buf.extend_from_slice(SIGN_MESSAGE_MAGIC.as_bytes());
    encode::write_compact_size(&mut buf, message.len() as u64);
    buf.extend_from_slice(message);
    sha256d(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_hash_commits_to_magic() {
        let a = signed_message_hash(b"hello");
        let b = signed_message_hash(b"hello!");
        assert_ne!(a, b);
        assert_eq!(a, signed_message_hash(b"hello"));
    }
}
