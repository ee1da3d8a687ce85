//! Transactions waiting on parents we have not seen yet.

use ember_core::transaction::{IndexedTransaction, Transaction};
use ember_hash::H256;
use rand::Rng;
use rustc_hash::{FxHashMap, FxHashSet};

/// A stored orphan: the raw bytes, how many distinct parents are still
/// unknown, and who sent it.
#[derive(Debug, Clone)]
pub struct Orphan {
    pub raw: Vec<u8>,
    pub missing: usize,
    pub peer: u64,
    parents: Vec<H256>,
}

#[derive(Default)]
pub struct OrphanPool {
    orphans: FxHashMap<H256, Orphan>,
    /// parent txid → orphans waiting on it.
    waiting: FxHashMap<H256, FxHashSet<H256>>,
}

impl OrphanPool {
    pub fn new() -> Self {
        OrphanPool::default()
    }

    pub fn len(&self) -> usize {
        self.orphans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orphans.is_empty()
    }

    pub fn has(&self, txid: &H256) -> bool {
        self.orphans.contains_key(txid)
    }

    pub fn waiting_on(&self, parent: &H256) -> Option<&FxHashSet<H256>> {
        self.waiting.get(parent)
    }

    pub fn get(&self, txid: &H256) -> Option<&Orphan> {
        self.orphans.get(txid)
    }

    /// Store a transaction waiting on `missing` distinct parents.
    pub fn store(&mut self, tx: &IndexedTransaction, missing: &[H256], peer: u64) {
        let txid = tx.txid();
        for parent in missing {
            self.waiting.entry(*parent).or_default().insert(txid);
        }
        self.orphans.insert(
            txid,
            Orphan {
                raw: tx.transaction.encode(true),
                missing: missing.len(),
                peer,
                parents: missing.to_vec(),
            },
        );
    }

    /// A parent arrived: decrement the counters of everything waiting on it
    /// and return the orphans that became fully resolved, ready for
    /// revalidation.
    pub fn resolve(&mut self, parent: &H256) -> Vec<(IndexedTransaction, u64)> {
        let waiters = match self.waiting.remove(parent) {
            Some(waiters) => waiters,
            None => return Vec::new(),
        };

        let mut ready = Vec::new();
        for txid in waiters {
            let done = match self.orphans.get_mut(&txid) {
                Some(orphan) => {
                    orphan.missing -= 1;
                    orphan.missing == 0
                }
                None => false,
            };
            if done {
                let orphan = self.orphans.remove(&txid).expect("checked above");
                match Transaction::from_bytes(&orphan.raw) {
                    Ok(tx) => ready.push((tx.into(), orphan.peer)),
                    Err(err) => {
                        log::debug!(target: "pool", "dropping undecodable orphan {txid}: {err}");
                    }
                }
            }
        }
        ready
    }

    /// Remove an orphan and unlink it from every waiting set.
    pub fn remove(&mut self, txid: &H256) -> Option<Orphan> {
        let orphan = self.orphans.remove(txid)?;
        for parent in &orphan.parents {
            if let Some(set) = self.waiting.get_mut(parent) {
                set.remove(txid);
                if set.is_empty() {
                    self.waiting.remove(parent);
                }
            }
        }
        Some(orphan)
    }

    /// Evict uniformly random orphans until the pool fits `max_orphans`.
    /// Returns the evicted ids.
    pub fn limit<R: Rng>(&mut self, max_orphans: usize, rng: &mut R) -> Vec<H256> {
        let mut evicted = Vec::new();
        while self.orphans.len() > max_orphans {
            let victim = {
                let index = rng.gen_range(0..self.orphans.len());
                *self.orphans.keys().nth(index).expect("non-empty")
            };
            self.remove(&victim);
            evicted.push(victim);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::script::Script;
    use ember_core::transaction::{OutPoint, TxInput, TxOutput};
    use ember_core::SEQUENCE_FINAL;
    use ember_hash::sha256d;

    fn child_of(parents: &[H256]) -> IndexedTransaction {
        Transaction {
            version: 1,
            inputs: parents
                .iter()
                .map(|p| {
                    TxInput::new(OutPoint::new(*p, 0), Script::default(), SEQUENCE_FINAL)
                })
                .collect(),
            outputs: vec![TxOutput::new(1000, Script::p2pkh(&[1u8; 20]))],
            locktime: 0,
        }
        .into()
    }

    #[test]
    fn resolve_single_parent() {
        let parent = sha256d(b"p");
        let child = child_of(&[parent]);
        let txid = child.txid();

        let mut pool = OrphanPool::new();
        pool.store(&child, &[parent], 7);
        assert!(pool.has(&txid));
        assert_eq!(pool.waiting_on(&parent).map(|s| s.len()), Some(1));

        let ready = pool.resolve(&parent);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0.txid(), txid);
        assert_eq!(ready[0].1, 7);
        assert!(pool.is_empty());
        assert!(pool.waiting_on(&parent).is_none());
    }

    #[test]
    fn resolve_decrements_once_per_parent() {
        let p1 = sha256d(b"p1");
        let p2 = sha256d(b"p2");
        let child = child_of(&[p1, p2]);

        let mut pool = OrphanPool::new();
        pool.store(&child, &[p1, p2], 0);

        assert!(pool.resolve(&p1).is_empty());
        assert_eq!(pool.get(&child.txid()).unwrap().missing, 1);
        // Resolving the same parent again must not double-count.
        assert!(pool.resolve(&p1).is_empty());
        assert_eq!(pool.get(&child.txid()).unwrap().missing, 1);

        let ready = pool.resolve(&p2);
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn remove_unlinks_waiting_sets() {
        let parent = sha256d(b"p");
        let a = child_of(&[parent]);
        let b = {
            let mut tx = a.transaction.clone();
            tx.locktime = 1;
            IndexedTransaction::from(tx)
        };

        let mut pool = OrphanPool::new();
        pool.store(&a, &[parent], 0);
        pool.store(&b, &[parent], 0);
        assert_eq!(pool.waiting_on(&parent).map(|s| s.len()), Some(2));

        pool.remove(&a.txid());
        assert_eq!(pool.waiting_on(&parent).map(|s| s.len()), Some(1));
        assert_eq!(pool.resolve(&parent).len(), 1);
    }

    #[test]
    fn limit_evicts_to_cap() {
        let mut pool = OrphanPool::new();
        for i in 0u64..10 {
            let parent = sha256d(&i.to_le_bytes());
            pool.store(&child_of(&[parent]), &[parent], 0);
        }
        let mut rng = rand::thread_rng();
        let evicted = pool.limit(4, &mut rng);
        assert_eq!(evicted.len(), 6);
        assert_eq!(pool.len(), 4);
    }
}
