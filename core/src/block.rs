//! Blocks: a header plus its transactions.

use crate::encode::{write_compact_size, DecodeError, Reader};
use crate::header::Header;
use crate::transaction::{IndexedTransaction, Transaction};
use ember_hash::{merkle_root, witness_merkle_root, sha256d_pair, H256};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<IndexedTransaction>,
}

impl Block {
    pub fn new(header: Header, transactions: Vec<IndexedTransaction>) -> Self {
        Block {
            header,
            transactions,
        }
    }

    pub fn hash(&self) -> H256 {
        self.header.hash()
    }

    pub fn coinbase(&self) -> Option<&IndexedTransaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    pub fn txids(&self) -> Vec<H256> {
        self.transactions.iter().map(|tx| tx.txid()).collect()
    }

    pub fn wtxids(&self) -> Vec<H256> {
        self.transactions.iter().map(|tx| tx.wtxid()).collect()
    }

    pub fn merkle_root(&self) -> H256 {
        merkle_root(&self.txids())
    }

    pub fn check_merkle_root(&self) -> bool {
        self.header.merkle_root == self.merkle_root()
    }

    pub fn has_witness(&self) -> bool {
        self.transactions.iter().any(|tx| tx.has_witness())
    }

    /// The witness commitment declared in the coinbase, if any. When
    /// several commitment outputs exist the last one counts.
    pub fn witness_commitment(&self) -> Option<H256> {
        let coinbase = self.coinbase()?;
        coinbase
            .outputs
            .iter()
            .rev()
            .find_map(|output| output.script.witness_commitment())
    }

    /// The commitment hash this block's contents demand, given the witness
    /// nonce from the coinbase witness.
    pub fn expected_commitment(&self, witness_nonce: &H256) -> H256 {
        let root = witness_merkle_root(&self.wtxids());
        sha256d_pair(&root, witness_nonce)
    }

    pub fn weight(&self) -> u64 {
        self.transactions.iter().map(|tx| tx.weight()).sum()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(80 + self.transactions.len() * 256);
        buf.extend_from_slice(&self.header.encode());
        write_compact_size(&mut buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            buf.extend_from_slice(&tx.transaction.encode(true));
        }
        buf
    }

    pub fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        let header = Header::decode(reader)?;
        let count = reader.read_compact_size()?;
        if count > 1_000_000 {
            return Err(DecodeError::OversizedField(count));
        }
        let mut transactions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            transactions.push(Transaction::decode(reader)?.into());
        }
        Ok(Block {
            header,
            transactions,
        })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(data);
        let block = Self::decode(&mut reader)?;
        if !reader.is_empty() {
            return Err(DecodeError::Malformed("trailing bytes"));
        }
        Ok(block)
    }
}
