//! The coin viewpoint: a snapshot of spendable outputs assembled for one
//! verification, with an undo log so block disconnects can be reversed.

use crate::encode::{write_compact_size, write_var_bytes, DecodeError, Reader};
use crate::script::Script;
use crate::transaction::{IndexedTransaction, OutPoint, Transaction, TxOutput};
use ember_hash::H256;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Height marking a coin that only exists in the mempool.
pub const UNCONFIRMED_HEIGHT: u32 = u32::MAX;

/// One unspent output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub value: u64,
    pub script: Script,
    pub height: u32,
    pub coinbase: bool,
    pub version: i32,
}

impl Coin {
    pub fn from_output(output: &TxOutput, height: u32, coinbase: bool, version: i32) -> Self {
        Coin {
            value: output.value,
            script: output.script.clone(),
            height,
            coinbase,
            version,
        }
    }
}

/// All still-unspent outputs of one transaction. The record stays alive
/// while any output remains.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Coins {
    pub version: i32,
    pub height: u32,
    pub coinbase: bool,
    outputs: FxHashMap<u32, Coin>,
}

impl Coins {
    pub fn new(version: i32, height: u32, coinbase: bool) -> Coins {
        Coins {
            version,
            height,
            coinbase,
            outputs: FxHashMap::default(),
        }
    }

    pub fn from_tx(tx: &Transaction, txid: H256, height: u32) -> (H256, Coins) {
        let coinbase = tx.is_coinbase();
        let outputs = tx
            .outputs
            .iter()
            .enumerate()
            .map(|(index, output)| {
                (
                    index as u32,
                    Coin::from_output(output, height, coinbase, tx.version),
                )
            })
            .collect();
        (
            txid,
            Coins {
                version: tx.version,
                height,
                coinbase,
                outputs,
            },
        )
    }

    pub fn insert(&mut self, index: u32, coin: Coin) {
        self.outputs.insert(index, coin);
    }

    pub fn get(&self, index: u32) -> Option<&Coin> {
        self.outputs.get(&index)
    }

    pub fn remove(&mut self, index: u32) -> Option<Coin> {
        self.outputs.remove(&index)
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }
}

/// An entry in the undo log. Height, coinbase flag and version are stamped
/// only when the spend emptied its `Coins` record; that is all a reconnect
/// needs to recreate the record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UndoCoin {
    pub prev_out: OutPoint,
    pub value: u64,
    pub script: Script,
    pub stamp: Option<(u32, bool, i32)>,
}

/// A mutable txid → `Coins` mapping with an ordered undo log. Built fresh
/// per verification.
#[derive(Clone, Debug, Default)]
pub struct CoinView {
    map: FxHashMap<H256, Coins>,
    undo: Vec<UndoCoin>,
}

impl CoinView {
    pub fn new() -> Self {
        CoinView::default()
    }

    pub fn add(&mut self, txid: H256, coins: Coins) {
        self.map.insert(txid, coins);
    }

    /// Add every output of a transaction as fresh coins at `height`.
    pub fn add_tx(&mut self, tx: &IndexedTransaction, height: u32) {
        let (txid, coins) = Coins::from_tx(tx, tx.txid(), height);
        self.map.insert(txid, coins);
    }

    pub fn add_coin(&mut self, prev_out: OutPoint, coin: Coin) {
        let entry = self.map.entry(prev_out.txid).or_insert_with(|| Coins {
            version: coin.version,
            height: coin.height,
            coinbase: coin.coinbase,
            outputs: FxHashMap::default(),
        });
        entry.insert(prev_out.index, coin);
    }

    pub fn add_output(
        &mut self,
        prev_out: OutPoint,
        output: &TxOutput,
        height: u32,
        coinbase: bool,
        version: i32,
    ) {
        self.add_coin(prev_out, Coin::from_output(output, height, coinbase, version));
    }

    pub fn get_coins(&self, txid: &H256) -> Option<&Coins> {
        self.map.get(txid)
    }

    pub fn get_output(&self, prev_out: &OutPoint) -> Option<&Coin> {
        self.map.get(&prev_out.txid)?.get(prev_out.index)
    }

    pub fn has_output(&self, prev_out: &OutPoint) -> bool {
        self.get_output(prev_out).is_some()
    }

    pub fn get_height(&self, prev_out: &OutPoint) -> Option<u32> {
        self.get_output(prev_out).map(|coin| coin.height)
    }

    pub fn is_coinbase(&self, prev_out: &OutPoint) -> bool {
        self.get_output(prev_out).map_or(false, |coin| coin.coinbase)
    }

    /// Spend an output, recording it in the undo log. The undo entry is
    /// stamped with the record metadata when this spend emptied it.
    pub fn spend_output(&mut self, prev_out: &OutPoint) -> Option<Coin> {
        let coins = self.map.get_mut(&prev_out.txid)?;
        let coin = coins.remove(prev_out.index)?;
        let stamp = if coins.is_empty() {
            Some((coins.height, coins.coinbase, coins.version))
        } else {
            None
        };
        self.undo.push(UndoCoin {
            prev_out: *prev_out,
            value: coin.value,
            script: coin.script.clone(),
            stamp,
        });
        Some(coin)
    }

    /// Remove an output without touching the undo log.
    pub fn remove_output(&mut self, prev_out: &OutPoint) -> Option<Coin> {
        let coins = self.map.get_mut(&prev_out.txid)?;
        coins.remove(prev_out.index)
    }

    pub fn undo_log(&self) -> &[UndoCoin] {
        &self.undo
    }

    /// Reverse the most recent recorded spend.
    pub fn revert_one(&mut self) -> bool {
        let entry = match self.undo.pop() {
            Some(entry) => entry,
            None => return false,
        };
        let coins = self.map.entry(entry.prev_out.txid).or_default();
        if let Some((height, coinbase, version)) = entry.stamp {
            coins.height = height;
            coins.coinbase = coinbase;
            coins.version = version;
        }
        let (height, coinbase, version) = (coins.height, coins.coinbase, coins.version);
        coins.insert(
            entry.prev_out.index,
            Coin {
                value: entry.value,
                script: entry.script,
                height,
                coinbase,
                version,
            },
        );
        true
    }

    /// Reverse every recorded spend, newest first.
    pub fn revert(&mut self) {
        while self.revert_one() {}
    }

    /// Fast serialization relative to a companion transaction: a presence
    /// bitmap over its inputs, then value and script per present coin. No
    /// height or version survives this format.
    pub fn to_fast(&self, tx: &Transaction) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut bitmap = vec![0u8; tx.inputs.len().div_ceil(8)];
        for (i, input) in tx.inputs.iter().enumerate() {
            if self.has_output(&input.prev_out) {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        buf.extend_from_slice(&bitmap);
        for input in &tx.inputs {
            if let Some(coin) = self.get_output(&input.prev_out) {
                buf.extend_from_slice(&coin.value.to_le_bytes());
                write_var_bytes(&mut buf, coin.script.as_bytes());
            }
        }
        buf
    }

    pub fn from_fast(data: &[u8], tx: &Transaction) -> Result<CoinView, DecodeError> {
        let mut reader = Reader::new(data);
        let bitmap = reader.read_bytes(tx.inputs.len().div_ceil(8))?.to_vec();
        let mut view = CoinView::new();
        for (i, input) in tx.inputs.iter().enumerate() {
            if bitmap[i / 8] & (1 << (i % 8)) == 0 {
                continue;
            }
            let value = reader.read_u64()?;
            let script = Script::new(reader.read_var_bytes(crate::transaction::MAX_SCRIPT_SIZE)?);
            view.add_coin(
                input.prev_out,
                Coin {
                    value,
                    script,
                    height: UNCONFIRMED_HEIGHT,
                    coinbase: false,
                    version: 1,
                },
            );
        }
        Ok(view)
    }

    /// Full serialization relative to a companion transaction. The first
    /// time a txid appears its record metadata is prefixed as varints:
    /// `height * 2 + coinbase`, then the version.
    pub fn to_full(&self, tx: &Transaction) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut bitmap = vec![0u8; tx.inputs.len().div_ceil(8)];
        for (i, input) in tx.inputs.iter().enumerate() {
            if self.has_output(&input.prev_out) {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        buf.extend_from_slice(&bitmap);

        let mut seen: Vec<H256> = Vec::new();
        for input in &tx.inputs {
            if let Some(coin) = self.get_output(&input.prev_out) {
                if !seen.contains(&input.prev_out.txid) {
                    seen.push(input.prev_out.txid);
                    let code = u64::from(coin.height) * 2 + u64::from(coin.coinbase);
                    write_compact_size(&mut buf, code);
                    write_compact_size(&mut buf, coin.version as u64);
                }
                buf.extend_from_slice(&coin.value.to_le_bytes());
                write_var_bytes(&mut buf, coin.script.as_bytes());
            }
        }
        buf
    }

    pub fn from_full(data: &[u8], tx: &Transaction) -> Result<CoinView, DecodeError> {
        let mut reader = Reader::new(data);
        let bitmap = reader.read_bytes(tx.inputs.len().div_ceil(8))?.to_vec();
        let mut view = CoinView::new();
        let mut seen: FxHashMap<H256, (u32, bool, i32)> = FxHashMap::default();
        for (i, input) in tx.inputs.iter().enumerate() {
            if bitmap[i / 8] & (1 << (i % 8)) == 0 {
                continue;
            }
            let meta = match seen.get(&input.prev_out.txid) {
                Some(meta) => *meta,
                None => {
                    let code = reader.read_compact_size()?;
                    let version = reader.read_compact_size()? as i32;
                    let meta = ((code / 2) as u32, code & 1 == 1, version);
                    seen.insert(input.prev_out.txid, meta);
                    meta
                }
            };
            let value = reader.read_u64()?;
            let script = Script::new(reader.read_var_bytes(crate::transaction::MAX_SCRIPT_SIZE)?);
            let (height, coinbase, version) = meta;
            view.add_coin(
                input.prev_out,
                Coin {
                    value,
                    script,
                    height,
                    coinbase,
                    version,
                },
            );
        }
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TxInput, TxOutput};
    use crate::SEQUENCE_FINAL;
    use ember_hash::sha256d;

    fn spending_tx(points: &[OutPoint]) -> Transaction {
        Transaction {
            version: 1,
            inputs: points
                .iter()
                .map(|p| TxInput::new(*p, Script::default(), SEQUENCE_FINAL))
                .collect(),
            outputs: vec![TxOutput::new(1, Script::default())],
            locktime: 0,
        }
    }

    fn coin(value: u64, height: u32) -> Coin {
        Coin {
            value,
            script: Script::p2pkh(&[9u8; 20]),
            height,
            coinbase: false,
            version: 1,
        }
    }

    #[test]
    fn spend_and_revert() {
        let txid = sha256d(b"funding");
        let a = OutPoint::new(txid, 0);
        let b = OutPoint::new(txid, 1);

        let mut view = CoinView::new();
        view.add_coin(a, coin(10, 5));
        view.add_coin(b, coin(20, 5));

        assert!(view.spend_output(&a).is_some());
        assert_eq!(view.undo_log().len(), 1);
        assert_eq!(view.undo_log()[0].stamp, None);

        assert!(view.spend_output(&b).is_some());
        // Second spend emptied the record, so it carries the stamp.
        assert_eq!(view.undo_log()[1].stamp, Some((5, false, 1)));

        assert!(view.spend_output(&a).is_none());

        view.revert();
        assert_eq!(view.get_output(&a).map(|c| c.value), Some(10));
        assert_eq!(view.get_output(&b).map(|c| c.value), Some(20));
        assert!(view.undo_log().is_empty());
    }

    #[test]
    fn fast_round_trip() {
        let txid = sha256d(b"funding");
        let present = OutPoint::new(txid, 0);
        let missing = OutPoint::new(sha256d(b"other"), 3);
        let tx = spending_tx(&[present, missing]);

        let mut view = CoinView::new();
        view.add_coin(present, coin(42, 7));

        let raw = view.to_fast(&tx);
        let decoded = CoinView::from_fast(&raw, &tx).unwrap();
        assert_eq!(decoded.get_output(&present).map(|c| c.value), Some(42));
        assert!(decoded.get_output(&missing).is_none());
        // The fast format deliberately drops heights.
        assert_eq!(
            decoded.get_height(&present),
            Some(UNCONFIRMED_HEIGHT)
        );
        assert_eq!(decoded.to_fast(&tx), raw);
    }

    #[test]
    fn full_round_trip_is_identity() {
        let txid = sha256d(b"funding");
        let a = OutPoint::new(txid, 0);
        let b = OutPoint::new(txid, 2);
        let c = OutPoint::new(sha256d(b"cb"), 1);
        let tx = spending_tx(&[a, b, c]);

        let mut view = CoinView::new();
        view.add_coin(a, coin(42, 7));
        view.add_coin(b, coin(43, 7));
        view.add_coin(
            c,
            Coin {
                value: 50,
                script: Script::default(),
                height: 3,
                coinbase: true,
                version: 2,
            },
        );

        let raw = view.to_full(&tx);
        let decoded = CoinView::from_full(&raw, &tx).unwrap();
        assert_eq!(decoded.get_output(&a), view.get_output(&a));
        assert_eq!(decoded.get_output(&b), view.get_output(&b));
        assert_eq!(decoded.get_output(&c), view.get_output(&c));
        assert!(decoded.is_coinbase(&c));
        assert_eq!(decoded.to_full(&tx), raw);
    }
}
