//! Versioned on-disk mirror of the mempool.
//!
//! Key space (all values little-endian):
//!   `V`          u32 layout version, currently 2
//!   `R`          32-byte tip hash
//!   `F`          serialized fee estimator
//!   `e` + txid   serialized entry
//!
//! The cache batches writes and flushes at most every ten seconds, plus at
//! block boundaries. Failures are logged by the caller; the in-memory pool
//! stays authoritative either way.

use byteorder::{ByteOrder, LittleEndian};
use ember_db::{Batch, KeyValueDB, Result};
use ember_hash::H256;
use std::sync::Arc;

pub const CACHE_VERSION: u32 = 2;

const KEY_VERSION: &[u8] = b"V";
const KEY_TIP: &[u8] = b"R";
const KEY_FEES: &[u8] = b"F";
const PREFIX_ENTRY: u8 = b'e';

const FLUSH_INTERVAL_MS: u64 = 10_000;

fn entry_key(txid: &H256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(PREFIX_ENTRY);
    key.extend_from_slice(txid.as_bytes());
    key
}

pub struct PersistentCache {
    db: Arc<dyn KeyValueDB>,
    batch: Batch,
    last_flush: u64,
}

impl PersistentCache {
    /// Open the cache against the current chain tip. A missing version key
    /// initialises the store; a mismatched version or tip wipes the entry
    /// space before use.
    pub fn open(db: Arc<dyn KeyValueDB>, tip: H256) -> Result<Self> {
        let mut init = Batch::new();

        let version = db
            .read(KEY_VERSION)?
            .filter(|raw| raw.len() == 4)
            .map(|raw| LittleEndian::read_u32(&raw));

        match version {
            None => {
                let mut value = [0u8; 4];
                LittleEndian::write_u32(&mut value, CACHE_VERSION);
                init.insert(KEY_VERSION.to_vec(), value.to_vec());
                init.insert(KEY_TIP.to_vec(), tip.as_bytes().to_vec());
            }
            Some(v) if v != CACHE_VERSION => {
                db.delete_prefix(&[PREFIX_ENTRY])?;
                let mut value = [0u8; 4];
                LittleEndian::write_u32(&mut value, CACHE_VERSION);
                init.insert(KEY_VERSION.to_vec(), value.to_vec());
                init.insert(KEY_TIP.to_vec(), tip.as_bytes().to_vec());
            }
            Some(_) => {
                let stored_tip = db.read(KEY_TIP)?.and_then(|raw| H256::from_slice(&raw));
                if stored_tip != Some(tip) {
                    db.delete_prefix(&[PREFIX_ENTRY])?;
                    init.insert(KEY_TIP.to_vec(), tip.as_bytes().to_vec());
                }
            }
        }

        if !init.is_empty() {
            db.write(init)?;
        }

        Ok(PersistentCache {
            db,
            batch: Batch::new(),
            last_flush: faketime::unix_time_as_millis(),
        })
    }

    /// Every persisted entry blob, in key order.
    pub fn load_entries(&self) -> Result<Vec<(H256, Vec<u8>)>> {
        let mut entries = Vec::new();
        self.db.traverse(&[PREFIX_ENTRY], &mut |key, value| {
            if let Some(txid) = H256::from_slice(&key[1..]) {
                entries.push((txid, value.to_vec()));
            }
            Ok(())
        })?;
        Ok(entries)
    }

    pub fn read_fees(&self) -> Result<Option<Vec<u8>>> {
        self.db.read(KEY_FEES)
    }

    pub fn save_entry(&mut self, txid: &H256, raw: Vec<u8>) {
        self.batch.insert(entry_key(txid), raw);
    }

    pub fn remove_entry(&mut self, txid: &H256) {
        self.batch.delete(entry_key(txid));
    }

    pub fn sync_tip(&mut self, tip: &H256) {
        self.batch
            .insert(KEY_TIP.to_vec(), tip.as_bytes().to_vec());
    }

    pub fn write_fees(&mut self, raw: Vec<u8>) {
        self.batch.insert(KEY_FEES.to_vec(), raw);
    }

    /// Discard the in-flight batch without writing.
    pub fn clear(&mut self) {
        self.batch = Batch::new();
    }

    /// Write out the pending batch. Without `force`, only when enough time
    /// has passed since the last flush.
    pub fn flush(&mut self, force: bool) -> Result<bool> {
        let now = faketime::unix_time_as_millis();
        if self.batch.is_empty() {
            return Ok(false);
        }
        if !force && now.saturating_sub(self.last_flush) < FLUSH_INTERVAL_MS {
            return Ok(false);
        }
        let batch = std::mem::take(&mut self.batch);
        self.db.write(batch)?;
        self.last_flush = now;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_db::MemoryKeyValueDB;
    use ember_hash::sha256d;

    fn open(db: &MemoryKeyValueDB, tip: H256) -> PersistentCache {
        PersistentCache::open(Arc::new(db.clone()), tip).unwrap()
    }

    #[test]
    fn initialises_and_reloads() {
        let db = MemoryKeyValueDB::open();
        let tip = sha256d(b"tip");

        let mut cache = open(&db, tip);
        let txid = sha256d(b"tx");
        cache.save_entry(&txid, vec![1, 2, 3]);
        cache.write_fees(vec![9]);
        assert!(cache.flush(true).unwrap());

        let cache = open(&db, tip);
        let entries = cache.load_entries().unwrap();
        assert_eq!(entries, vec![(txid, vec![1, 2, 3])]);
        assert_eq!(cache.read_fees().unwrap(), Some(vec![9]));
    }

    #[test]
    fn tip_mismatch_wipes_entries() {
        let db = MemoryKeyValueDB::open();
        let mut cache = open(&db, sha256d(b"tip1"));
        cache.save_entry(&sha256d(b"tx"), vec![1]);
        cache.flush(true).unwrap();

        let cache = open(&db, sha256d(b"tip2"));
        assert!(cache.load_entries().unwrap().is_empty());
    }

    #[test]
    fn version_mismatch_wipes_entries() {
        let db = MemoryKeyValueDB::open();
        let tip = sha256d(b"tip");
        let mut cache = open(&db, tip);
        cache.save_entry(&sha256d(b"tx"), vec![1]);
        cache.flush(true).unwrap();

        // Corrupt the version key.
        let mut batch = Batch::new();
        batch.insert(KEY_VERSION.to_vec(), vec![9, 0, 0, 0]);
        db.write(batch).unwrap();

        let cache = open(&db, tip);
        assert!(cache.load_entries().unwrap().is_empty());
        // And the version was rewritten.
        assert_eq!(db.read(KEY_VERSION).unwrap(), Some(vec![2, 0, 0, 0]));
    }

    #[test]
    fn clear_discards_pending_writes() {
        let db = MemoryKeyValueDB::open();
        let mut cache = open(&db, sha256d(b"tip"));
        cache.save_entry(&sha256d(b"tx"), vec![1]);
        cache.clear();
        assert!(!cache.flush(true).unwrap());
        assert!(cache.load_entries().unwrap().is_empty());
    }

    #[test]
    fn unforced_flush_is_time_gated() {
        let db = MemoryKeyValueDB::open();
        let mut cache = open(&db, sha256d(b"tip"));
        cache.save_entry(&sha256d(b"tx"), vec![1]);
        // Opened just now, so the interval has not elapsed.
        assert!(!cache.flush(false).unwrap());
        assert!(cache.flush(true).unwrap());
    }
}
