//! A candidate block under construction.
//!
//! The template owns the selected mempool entries and the header fields;
//! the coinbase is rebuilt for every extranonce pair so the merkle root can
//! be rolled without touching the selection.

use ember_core::block::Block;
use ember_core::header::Header;
use ember_core::script::Script;
use ember_core::transaction::{IndexedTransaction, OutPoint, Transaction, TxInput, TxOutput};
use ember_hash::{merkle_root, sha256d_pair, witness_merkle_root, H256};
use serde::{Deserialize, Serialize};

/// An extranonce pair, identifying one coinbase variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nonces {
    pub nonce1: u32,
    pub nonce2: u32,
}

/// One selected transaction.
#[derive(Debug, Clone)]
pub struct TemplateEntry {
    pub tx: IndexedTransaction,
    pub fee: u64,
    pub sigops: u64,
    pub weight: u64,
    /// 1-based indices of in-template parents.
    pub depends: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub prev_block: H256,
    pub version: i32,
    pub height: u32,
    /// Current header timestamp.
    pub time: u32,
    /// Median time past at the tip; `mintime` is one above.
    pub mtp: u64,
    pub bits: u32,
    pub target: [u8; 32],
    pub coinbase_flags: Vec<u8>,
    pub payout: Script,
    pub witness: bool,
    /// Total fees of the selection.
    pub fees: u64,
    pub subsidy: u64,
    /// Mempool size when the template was cut, for the longpoll id.
    pub pool_total: usize,
    pub items: Vec<TemplateEntry>,
}

impl BlockTemplate {
    pub fn reward(&self) -> u64 {
        self.subsidy + self.fees
    }

    pub fn min_time(&self) -> u32 {
        (self.mtp + 1) as u32
    }

    /// `reversed(prevHash) || zero-padded mempool counter`: encodes both
    /// the tip and the mempool state so stale work is detectable.
    pub fn longpoll_id(&self) -> String {
        format!("{}{:010}", self.prev_block.to_rev_hex(), self.pool_total)
    }

    /// The witness commitment over the current selection. Independent of
    /// the extranonce, since the coinbase slot of the witness tree is
    /// zeroed by consensus.
    pub fn witness_commitment(&self) -> H256 {
        let mut wtxids = Vec::with_capacity(self.items.len() + 1);
        wtxids.push(H256::zero());
        wtxids.extend(self.items.iter().map(|item| item.tx.wtxid()));
        let root = witness_merkle_root(&wtxids);
        sha256d_pair(&root, &H256::zero())
    }

    /// Build the coinbase for an extranonce pair.
    pub fn coinbase(&self, nonces: Nonces) -> IndexedTransaction {
        let mut extranonce = [0u8; 8];
        extranonce[..4].copy_from_slice(&nonces.nonce1.to_be_bytes());
        extranonce[4..].copy_from_slice(&nonces.nonce2.to_be_bytes());

        let height_push = script_number(i64::from(self.height));
        let script = Script::pushes(&[&height_push, &self.coinbase_flags, &extranonce]);

        let mut input = TxInput::new(OutPoint::null(), script, 0xffff_ffff);
        if self.witness {
            // The witness nonce committed to by the commitment output.
            input.witness = vec![vec![0u8; 32]];
        }

        let mut outputs = vec![TxOutput::new(self.reward(), self.payout.clone())];
        if self.witness {
            outputs.push(TxOutput::new(
                0,
                Script::commitment(&self.witness_commitment()),
            ));
        }

        Transaction {
            version: 1,
            inputs: vec![input],
            outputs,
            locktime: 0,
        }
        .into()
    }

    /// Merkle root for an extranonce pair.
    pub fn merkle_root(&self, nonces: Nonces) -> H256 {
        let mut txids = Vec::with_capacity(self.items.len() + 1);
        txids.push(self.coinbase(nonces).txid());
        txids.extend(self.items.iter().map(|item| item.tx.txid()));
        merkle_root(&txids)
    }

    pub fn header(&self, root: H256, time: u32, nonce: u32) -> Header {
        Header {
            version: self.version,
            prev_block: self.prev_block,
            merkle_root: root,
            time,
            bits: self.bits,
            nonce,
        }
    }

    /// Assemble the final block for a proof.
    pub fn commit(&self, nonces: Nonces, time: u32, nonce: u32) -> Block {
        let coinbase = self.coinbase(nonces);
        let mut txs = Vec::with_capacity(self.items.len() + 1);
        txs.push(coinbase);
        txs.extend(self.items.iter().map(|item| item.tx.clone()));
        let root = merkle_root(&txs.iter().map(|tx| tx.txid()).collect::<Vec<_>>());
        Block::new(self.header(root, time, nonce), txs)
    }
}

/// Minimal script-number encoding, little-endian with a sign bit.
fn script_number(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut abs = value.unsigned_abs();
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    if out.last().map_or(false, |b| b & 0x80 != 0) {
        out.push(if value < 0 { 0x80 } else { 0x00 });
    } else if value < 0 {
        let last = out.len() - 1;
        out[last] |= 0x80;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::difficulty::compact_to_target;

    fn template() -> BlockTemplate {
        BlockTemplate {
            prev_block: ember_hash::sha256d(b"prev"),
            version: 4,
            height: 171,
            time: 1_600_000_700,
            mtp: 1_600_000_000,
            bits: 0x207f_ffff,
            target: compact_to_target(0x207f_ffff).unwrap(),
            coinbase_flags: b"mined by ember".to_vec(),
            payout: Script::p2pkh(&[1u8; 20]),
            witness: false,
            fees: 500,
            subsidy: 50_0000_0000,
            pool_total: 3,
            items: Vec::new(),
        }
    }

    #[test]
    fn extranonce_changes_the_root() {
        let template = template();
        let a = template.merkle_root(Nonces {
            nonce1: 0,
            nonce2: 1,
        });
        let b = template.merkle_root(Nonces {
            nonce1: 0,
            nonce2: 2,
        });
        assert_ne!(a, b);
    }

    #[test]
    fn commit_produces_consistent_block() {
        let template = template();
        let nonces = Nonces {
            nonce1: 7,
            nonce2: 9,
        };
        let block = template.commit(nonces, template.time, 42);
        assert!(block.check_merkle_root());
        assert_eq!(block.header.merkle_root, template.merkle_root(nonces));
        assert_eq!(block.transactions[0].outputs[0].value, template.reward());
        assert_eq!(block.coinbase().is_some(), true);
    }

    #[test]
    fn witness_template_commits() {
        let mut template = template();
        template.witness = true;
        let block = template.commit(
            Nonces {
                nonce1: 0,
                nonce2: 0,
            },
            template.time,
            0,
        );
        let commitment = block.witness_commitment().expect("commitment output");
        assert_eq!(commitment, template.witness_commitment());
        assert_eq!(
            block.expected_commitment(&H256::zero()),
            commitment
        );
    }

    #[test]
    fn longpoll_id_shape() {
        let template = template();
        let id = template.longpoll_id();
        assert_eq!(id.len(), 74);
        assert!(id.starts_with(&template.prev_block.to_rev_hex()));
        assert!(id.ends_with("0000000003"));
    }

    #[test]
    fn script_number_minimal() {
        assert_eq!(script_number(0), Vec::<u8>::new());
        assert_eq!(script_number(1), vec![1]);
        assert_eq!(script_number(127), vec![127]);
        assert_eq!(script_number(128), vec![128, 0]);
        assert_eq!(script_number(171), vec![171, 0]);
        assert_eq!(script_number(65536), vec![0, 0, 1]);
    }
}
