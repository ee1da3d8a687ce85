//! Transactions and their consensus serialization.

use crate::coins::CoinView;
use crate::encode::{write_compact_size, write_var_bytes, DecodeError, Reader};
use crate::script::{Script, ScriptClass, VerifyFlags};
use crate::{LOCKTIME_THRESHOLD, SEQUENCE_FINAL, WITNESS_SCALE_FACTOR};
use ember_hash::{sha256d, H256};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// Consensus cap on an individual script's size.
pub const MAX_SCRIPT_SIZE: usize = 10_000;

const MAX_INPUTS: usize = 100_000;
const MAX_OUTPUTS: usize = 100_000;
const MAX_WITNESS_ITEMS: usize = 100_000;
const MAX_WITNESS_ITEM_SIZE: usize = 80_000;

#[derive(Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct OutPoint {
    pub txid: H256,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: H256, index: u32) -> Self {
        OutPoint { txid, index }
    }

    pub fn null() -> Self {
        OutPoint {
            txid: H256::zero(),
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == u32::MAX
    }

    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.txid.as_bytes());
        buf.extend_from_slice(&self.index.to_le_bytes());
    }

    pub fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        let txid = reader.read_hash()?;
        let index = reader.read_u32()?;
        Ok(OutPoint { txid, index })
    }
}

/// Per-input witness stack.
pub type Witness = Vec<Vec<u8>>;

#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, Debug)]
pub struct TxInput {
    pub prev_out: OutPoint,
    pub script: Script,
    pub sequence: u32,
    pub witness: Witness,
}

impl TxInput {
    pub fn new(prev_out: OutPoint, script: Script, sequence: u32) -> Self {
        TxInput {
            prev_out,
            script,
            sequence,
            witness: Vec::new(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, Debug)]
pub struct TxOutput {
    pub value: u64,
    pub script: Script,
}

impl TxOutput {
    pub fn new(value: u64, script: Script) -> Self {
        TxOutput { value, script }
    }

    /// Serialized size: value plus prefixed script.
    pub fn encoded_len(&self) -> usize {
        8 + self.script.encoded_len()
    }

    /// Dust test at the given relay rate (satoshis per kvB). Spending a
    /// witness output is cheaper, so its threshold is lower.
    pub fn is_dust(&self, relay_rate: u64) -> bool {
        if self.script.classify() == ScriptClass::NullData {
            return false;
        }
        let spend_cost = if self.script.witness_program().is_some() {
            67
        } else {
            148
        };
        let bytes = (self.encoded_len() + spend_cost) as u64;
        self.value < bytes * 3 * relay_rate / 1000
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Debug, Default)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub locktime: u32,
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prev_out.is_null()
    }

    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }

    /// BIP125: any input with a sequence low enough signals replaceability.
    pub fn is_rbf(&self) -> bool {
        self.inputs
            .iter()
            .any(|input| input.sequence < SEQUENCE_FINAL - 1)
    }

    /// Locktime finality against a height and a median-time-past.
    pub fn is_final(&self, height: u32, mtp: u64) -> bool {
        if self.locktime == 0 {
            return true;
        }
        let cutoff = if self.locktime < LOCKTIME_THRESHOLD {
            u64::from(height)
        } else {
            mtp
        };
        if u64::from(self.locktime) < cutoff {
            return true;
        }
        self.inputs.iter().all(|i| i.sequence == SEQUENCE_FINAL)
    }

    /// Checked sum of output values.
    pub fn output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.value))
    }

    pub fn input_points(&self) -> impl Iterator<Item = &OutPoint> {
        self.inputs.iter().map(|input| &input.prev_out)
    }

    pub fn output_points(&self, txid: H256) -> Vec<OutPoint> {
        (0..self.outputs.len() as u32)
            .map(|index| OutPoint::new(txid, index))
            .collect()
    }

    pub fn encode(&self, witness: bool) -> Vec<u8> {
        let witness = witness && self.has_witness();
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(&self.version.to_le_bytes());
        if witness {
            buf.push(0x00);
            buf.push(0x01);
        }
        write_compact_size(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.prev_out.encode_to(&mut buf);
            input.script.encode_to(&mut buf);
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_compact_size(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            buf.extend_from_slice(&output.value.to_le_bytes());
            output.script.encode_to(&mut buf);
        }
        if witness {
            for input in &self.inputs {
                write_compact_size(&mut buf, input.witness.len() as u64);
                for item in &input.witness {
                    write_var_bytes(&mut buf, item);
                }
            }
        }
        buf.extend_from_slice(&self.locktime.to_le_bytes());
        buf
    }

    pub fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        let version = reader.read_i32()?;

        let first = reader.read_u8()?;
        let (segwit, input_count) = if first == 0x00 {
            let flag = reader.read_u8()?;
            if flag != 0x01 {
                return Err(DecodeError::Malformed("bad witness flag"));
            }
            (true, reader.read_compact_size()?)
        } else {
            (false, read_compact_size_from(reader, first)?)
        };
        if input_count as usize > MAX_INPUTS {
            return Err(DecodeError::OversizedField(input_count));
        }

        let mut inputs = Vec::with_capacity(input_count as usize);
        for _ in 0..input_count {
            let prev_out = OutPoint::decode(reader)?;
            let script = Script::new(reader.read_var_bytes(MAX_SCRIPT_SIZE)?);
            let sequence = reader.read_u32()?;
            inputs.push(TxInput::new(prev_out, script, sequence));
        }

        let output_count = reader.read_compact_size()?;
        if output_count as usize > MAX_OUTPUTS {
            return Err(DecodeError::OversizedField(output_count));
        }
        let mut outputs = Vec::with_capacity(output_count as usize);
        for _ in 0..output_count {
            let value = reader.read_u64()?;
            let script = Script::new(reader.read_var_bytes(MAX_SCRIPT_SIZE)?);
            outputs.push(TxOutput::new(value, script));
        }

        if segwit {
            for input in &mut inputs {
                let items = reader.read_compact_size()?;
                if items as usize > MAX_WITNESS_ITEMS {
                    return Err(DecodeError::OversizedField(items));
                }
                let mut witness = Vec::with_capacity(items as usize);
                for _ in 0..items {
                    witness.push(reader.read_var_bytes(MAX_WITNESS_ITEM_SIZE)?);
                }
                input.witness = witness;
            }
        }

        let locktime = reader.read_u32()?;
        Ok(Transaction {
            version,
            inputs,
            outputs,
            locktime,
        })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(data);
        let tx = Self::decode(&mut reader)?;
        if !reader.is_empty() {
            return Err(DecodeError::Malformed("trailing bytes"));
        }
        Ok(tx)
    }
}

/// Finish a compact-size whose first byte has already been consumed.
fn read_compact_size_from(reader: &mut Reader, first: u8) -> Result<u64, DecodeError> {
    match first {
        0..=0xfc => Ok(u64::from(first)),
        0xfd => Ok(u64::from(reader.read_u16()?)),
        0xfe => Ok(u64::from(reader.read_u32()?)),
        0xff => reader.read_u64(),
    }
}

/// A transaction with its identity and sizes memoised.
#[derive(Clone, Serialize, Deserialize, Debug, Eq)]
pub struct IndexedTransaction {
    pub transaction: Transaction,
    txid: H256,
    wtxid: H256,
    base_size: u64,
    total_size: u64,
}

impl PartialEq for IndexedTransaction {
    fn eq(&self, other: &IndexedTransaction) -> bool {
        self.wtxid == other.wtxid
    }
}

impl std::hash::Hash for IndexedTransaction {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(self.txid.as_bytes());
    }
}

impl Deref for IndexedTransaction {
    type Target = Transaction;

    fn deref(&self) -> &Transaction {
        &self.transaction
    }
}

impl From<Transaction> for IndexedTransaction {
    fn from(transaction: Transaction) -> Self {
        let legacy = transaction.encode(false);
        let txid = sha256d(&legacy);
        let (wtxid, total_size) = if transaction.has_witness() {
            let full = transaction.encode(true);
            (sha256d(&full), full.len() as u64)
        } else {
            (txid, legacy.len() as u64)
        };
        IndexedTransaction {
            transaction,
            txid,
            wtxid,
            base_size: legacy.len() as u64,
            total_size,
        }
    }
}

impl IndexedTransaction {
    pub fn txid(&self) -> H256 {
        self.txid
    }

    pub fn wtxid(&self) -> H256 {
        self.wtxid
    }

    /// Size of the legacy serialization.
    pub fn base_size(&self) -> u64 {
        self.base_size
    }

    /// Size including witness data.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn weight(&self) -> u64 {
        self.base_size * (WITNESS_SCALE_FACTOR - 1) + self.total_size
    }

    pub fn vsize(&self) -> u64 {
        self.weight().div_ceil(WITNESS_SCALE_FACTOR)
    }

    pub fn output_points(&self) -> Vec<OutPoint> {
        self.transaction.output_points(self.txid)
    }

    /// Total sigop cost in weight-scaled units, counting legacy, P2SH and
    /// witness sigops against the coins being spent.
    pub fn sigop_cost(&self, view: &CoinView, flags: VerifyFlags) -> u64 {
        let legacy: u64 = self
            .inputs
            .iter()
            .map(|i| u64::from(i.script.sigops(false)))
            .chain(self.outputs.iter().map(|o| u64::from(o.script.sigops(false))))
            .sum();
        let mut cost = legacy * WITNESS_SCALE_FACTOR;

        if self.is_coinbase() {
            return cost;
        }

        for input in &self.inputs {
            let coin = match view.get_output(&input.prev_out) {
                Some(coin) => coin,
                None => continue,
            };

            if flags.contains(VerifyFlags::P2SH)
                && coin.script.classify() == ScriptClass::ScriptHash
            {
                if let Some(redeem) = input.script.last_push() {
                    cost += u64::from(Script::new(redeem).sigops(true)) * WITNESS_SCALE_FACTOR;
                }
            }

            if flags.contains(VerifyFlags::WITNESS) {
                // The program may sit in the previous output directly or
                // behind a P2SH redeem script.
                let program_script;
                let program = if coin.script.witness_program().is_some() {
                    coin.script.witness_program()
                } else if coin.script.classify() == ScriptClass::ScriptHash {
                    match input.script.last_push() {
                        Some(redeem) => {
                            program_script = Script::new(redeem);
                            program_script.witness_program().map(|(v, p)| (v, p))
                        }
                        None => None,
                    }
                } else {
                    None
                };

                match program {
                    Some((0, prog)) if prog.len() == 20 => cost += 1,
                    Some((0, prog)) if prog.len() == 32 => {
                        if let Some(witness_script) = input.witness.last() {
                            cost += u64::from(Script::new(witness_script.clone()).sigops(true));
                        }
                    }
                    _ => {}
                }
            }
        }
        cost
    }

    /// Aged input value per byte, the classic free-relay priority.
    pub fn priority(&self, view: &CoinView, height: u32) -> f64 {
        if self.is_coinbase() {
            return 0.0;
        }
        let mut sum = 0f64;
        for input in &self.inputs {
            if let Some(coin) = view.get_output(&input.prev_out) {
                if coin.height <= height {
                    let age = f64::from(height - coin.height);
                    sum += coin.value as f64 * age;
                }
            }
        }
        sum / self.base_size as f64
    }

    /// Fee given a view holding all inputs. `None` when an input is missing
    /// or sums overflow.
    pub fn fee(&self, view: &CoinView) -> Option<u64> {
        let mut input_value = 0u64;
        for input in &self.inputs {
            input_value = input_value.checked_add(view.get_output(&input.prev_out)?.value)?;
        }
        input_value.checked_sub(self.output_value()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput::new(
                OutPoint::new(sha256d(b"parent"), 0),
                Script::pushes(&[b"sig"]),
                SEQUENCE_FINAL,
            )],
            outputs: vec![TxOutput::new(50_000, Script::p2pkh(&[1u8; 20]))],
            locktime: 0,
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let tx = simple_tx();
        let bytes = tx.encode(true);
        assert_eq!(Transaction::from_bytes(&bytes).unwrap(), tx);
    }

    #[test]
    fn witness_round_trip_and_ids() {
        let mut tx = simple_tx();
        tx.inputs[0].witness = vec![vec![1, 2, 3], vec![4]];
        let bytes = tx.encode(true);
        let decoded = Transaction::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, tx);

        let indexed: IndexedTransaction = tx.clone().into();
        assert_ne!(indexed.txid(), indexed.wtxid());
        assert!(indexed.total_size() > indexed.base_size());
        assert!(indexed.vsize() < indexed.total_size());

        tx.inputs[0].witness.clear();
        let indexed: IndexedTransaction = tx.into();
        assert_eq!(indexed.txid(), indexed.wtxid());
    }

    #[test]
    fn coinbase_detection() {
        let cb = Transaction {
            version: 1,
            inputs: vec![TxInput::new(OutPoint::null(), Script::pushes(&[&[1]]), 0)],
            outputs: vec![TxOutput::new(50, Script::default())],
            locktime: 0,
        };
        assert!(cb.is_coinbase());
        assert!(!simple_tx().is_coinbase());
    }

    #[test]
    fn rbf_signalling() {
        let mut tx = simple_tx();
        assert!(!tx.is_rbf());
        tx.inputs[0].sequence = 0xffff_fffd;
        assert!(tx.is_rbf());
    }

    #[test]
    fn finality() {
        let mut tx = simple_tx();
        assert!(tx.is_final(100, 0));

        tx.locktime = 200;
        tx.inputs[0].sequence = 0;
        assert!(!tx.is_final(100, 0));
        assert!(tx.is_final(201, 0));

        tx.locktime = LOCKTIME_THRESHOLD + 500;
        assert!(!tx.is_final(201, u64::from(LOCKTIME_THRESHOLD)));
        assert!(tx.is_final(201, u64::from(LOCKTIME_THRESHOLD) + 501));
    }

    #[test]
    fn dust_threshold() {
        let dusty = TxOutput::new(100, Script::p2pkh(&[0u8; 20]));
        assert!(dusty.is_dust(1000));
        let fine = TxOutput::new(100_000, Script::p2pkh(&[0u8; 20]));
        assert!(!fine.is_dust(1000));
    }
}
