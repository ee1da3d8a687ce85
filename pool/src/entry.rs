//! Mempool entries and the eviction key.

use byteorder::{ByteOrder, LittleEndian};
use ember_core::encode::{write_var_bytes, DecodeError, Reader};
use ember_core::transaction::{IndexedTransaction, Transaction};
use ember_hash::H256;
use std::cmp::Ordering;

/// Bookkeeping overhead charged per entry on top of the raw transaction.
const ENTRY_OVERHEAD: u64 = 168;

/// An entry in the transaction pool.
#[derive(Debug, Clone, PartialEq)]
pub struct MempoolEntry {
    tx: IndexedTransaction,
    /// Virtual size.
    pub size: u64,
    pub sigops: u64,
    /// Fee actually paid.
    pub fee: u64,
    /// Fee plus prioritisation delta; what accounting runs on.
    pub delta_fee: i64,
    /// Sum of `delta_fee` over this entry and all its descendants.
    pub desc_fee: i64,
    /// Sum of `size` over this entry and all its descendants.
    pub desc_size: u64,
    pub priority: f64,
    /// Receive time, unix seconds.
    pub time: u64,
    /// Height the entry was created at (tip + 1).
    pub height: u32,
    /// In-pool parents at insertion time.
    pub depends: Vec<H256>,
}

impl MempoolEntry {
    pub fn new(
        tx: IndexedTransaction,
        fee: u64,
        sigops: u64,
        priority: f64,
        height: u32,
        time: u64,
    ) -> Self {
        let size = tx.vsize();
        MempoolEntry {
            tx,
            size,
            sigops,
            fee,
            delta_fee: fee as i64,
            desc_fee: fee as i64,
            desc_size: size,
            priority,
            time,
            height,
            depends: Vec::new(),
        }
    }

    pub fn tx(&self) -> &IndexedTransaction {
        &self.tx
    }

    pub fn txid(&self) -> H256 {
        self.tx.txid()
    }

    pub fn wtxid(&self) -> H256 {
        self.tx.wtxid()
    }

    /// Memory footprint charged against the pool budget.
    pub fn mem_usage(&self) -> u64 {
        self.tx.total_size() + ENTRY_OVERHEAD
    }

    /// Fee rate of this entry alone, satoshis per kvB.
    pub fn own_rate(&self) -> u64 {
        rate(self.delta_fee, self.size)
    }

    /// Fee rate of the package below this entry.
    pub fn desc_rate(&self) -> u64 {
        rate(self.desc_fee, self.desc_size)
    }

    /// A package is valued by its weakest unit: the lower of the two rates.
    pub fn evict_key(&self) -> EvictKey {
        EvictKey {
            rate: self.own_rate().min(self.desc_rate()),
            time: self.time,
        }
    }

    /// Whether the entry qualifies for free relay by priority.
    pub fn is_free(&self, threshold: f64) -> bool {
        self.priority >= threshold
    }

    /// Serialize for the persistent cache. Descendant counters and depends
    /// are recomputed when the pool is rebuilt, so they are not stored.
    pub fn to_raw(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.tx.total_size() as usize + 64);
        write_var_bytes(&mut buf, &self.tx.transaction.encode(true));
        buf.extend_from_slice(&self.fee.to_le_bytes());
        buf.extend_from_slice(&self.delta_fee.to_le_bytes());
        buf.extend_from_slice(&self.sigops.to_le_bytes());
        let mut priority = [0u8; 8];
        LittleEndian::write_u64(&mut priority, self.priority.to_bits());
        buf.extend_from_slice(&priority);
        buf.extend_from_slice(&self.time.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf
    }

    pub fn from_raw(data: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(data);
        let tx_bytes = reader.read_var_bytes(4_000_000)?;
        let tx: IndexedTransaction = Transaction::from_bytes(&tx_bytes)?.into();
        let fee = reader.read_u64()?;
        let delta_fee = reader.read_u64()? as i64;
        let sigops = reader.read_u64()?;
        let priority = f64::from_bits(reader.read_u64()?);
        let time = reader.read_u64()?;
        let height = reader.read_u32()?;
        let size = tx.vsize();
        Ok(MempoolEntry {
            tx,
            size,
            sigops,
            fee,
            delta_fee,
            desc_fee: delta_fee,
            desc_size: size,
            priority,
            time,
            height,
            depends: Vec::new(),
        })
    }
}

fn rate(fee: i64, size: u64) -> u64 {
    if size == 0 {
        return 0;
    }
    let fee = fee.max(0) as u128;
    (fee * 1000 / u128::from(size)) as u64
}

/// Min-heap key for eviction: lowest package rate first, newest first on
/// ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictKey {
    pub rate: u64,
    pub time: u64,
}

impl Ord for EvictKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rate
            .cmp(&other.rate)
            .then_with(|| other.time.cmp(&self.time))
    }
}

impl PartialOrd for EvictKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::script::Script;
    use ember_core::transaction::{OutPoint, TxInput, TxOutput};
    use ember_core::SEQUENCE_FINAL;
    use ember_hash::sha256d;

    fn entry(fee: u64, time: u64) -> MempoolEntry {
        let tx: IndexedTransaction = Transaction {
            version: 1,
            inputs: vec![TxInput::new(
                OutPoint::new(sha256d(&time.to_le_bytes()), 0),
                Script::default(),
                SEQUENCE_FINAL,
            )],
            outputs: vec![TxOutput::new(1000, Script::p2pkh(&[1u8; 20]))],
            locktime: 0,
        }
        .into();
        MempoolEntry::new(tx, fee, 4, 0.0, 1, time)
    }

    #[test]
    fn low_rate_sorts_first() {
        let mut keys = vec![
            entry(50_000, 30).evict_key(),
            entry(10, 31).evict_key(),
            entry(10_000, 32).evict_key(),
        ];
        keys.sort();
        assert_eq!(
            keys.iter().map(|k| k.time).collect::<Vec<_>>(),
            vec![31, 32, 30]
        );
    }

    #[test]
    fn equal_rate_newest_first() {
        let mut keys = vec![
            entry(500, 30).evict_key(),
            entry(500, 31).evict_key(),
            entry(500, 32).evict_key(),
        ];
        keys.sort();
        assert_eq!(
            keys.iter().map(|k| k.time).collect::<Vec<_>>(),
            vec![32, 31, 30]
        );
    }

    #[test]
    fn package_rate_uses_weakest_side() {
        let mut e = entry(5_000, 1);
        // A heavy low-fee descendant drags the package below the own rate.
        e.desc_fee += 100;
        e.desc_size += 10_000;
        assert!(e.desc_rate() < e.own_rate());
        assert_eq!(e.evict_key().rate, e.desc_rate());
    }

    #[test]
    fn raw_round_trip() {
        let e = entry(1234, 99);
        let decoded = MempoolEntry::from_raw(&e.to_raw()).unwrap();
        assert_eq!(decoded.txid(), e.txid());
        assert_eq!(decoded.fee, e.fee);
        assert_eq!(decoded.delta_fee, e.delta_fee);
        assert_eq!(decoded.time, e.time);
        assert_eq!(decoded.height, e.height);
        assert_eq!(decoded.size, e.size);
    }
}
