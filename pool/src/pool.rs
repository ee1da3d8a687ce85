//! The transaction pool: admission, the unconfirmed DAG, eviction and the
//! reorg hooks.
//!
//! All mutating entry points serialize on `locker`; the data itself lives
//! behind an `RwLock` so queries stay cheap. The chain is read freely and
//! never mutated from here.

use crate::cache::PersistentCache;
use crate::config::PoolConfig;
use crate::entry::{EvictKey, MempoolEntry};
use crate::error::{RejectCategory, VerifyError};
use crate::orphan::OrphanPool;
use crate::rejects::RejectFilter;
use crate::validator::{
    check_inputs, check_sanity, check_standard, check_standard_inputs, verify_scripts,
    verify_scripts_paranoid, FREE_THRESHOLD,
};
use ember_core::coins::{Coin, CoinView, UNCONFIRMED_HEIGHT};
use ember_core::script::VerifyFlags;
use ember_core::transaction::{IndexedTransaction, OutPoint};
use ember_core::{MAX_TX_SIGOPS_COST, MAX_TX_WEIGHT};
use ember_db::KeyValueDB;
use ember_hash::H256;
use ember_traits::{ChainProvider, CoinViewChainExt, FeeEstimator, LockFlags, ScriptVerifier};
use ember_util::{Mutex, RwLock};
use log::{debug, info, warn};
use lru::LruCache;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// Free transactions decay with a ten minute half-life.
const FREE_DECAY_HALF_LIFE_MS: f64 = 600_000.0;

/// Recently confirmed txids kept for the duplicate check.
const COMMITTED_CACHE_SIZE: usize = 100_000;

/// Where an unconfirmed transaction currently lives.
#[derive(Debug, Clone)]
pub struct TxMeta {
    pub tx: IndexedTransaction,
    /// Height the entry was created at; `None` for orphans.
    pub height: Option<u32>,
    pub time: Option<u64>,
    pub orphan: bool,
}

/// Summary statistics for RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MempoolInfo {
    pub total_tx: usize,
    pub total_orphans: usize,
    pub bytes: u64,
    pub usage: u64,
    pub max_size: u64,
    pub min_relay: u64,
}

struct PoolInner {
    map: FxHashMap<H256, MempoolEntry>,
    /// outpoint → txid of the single pool transaction spending it.
    spents: FxHashMap<OutPoint, H256>,
    /// address hash → unspent pool outpoints.
    coin_index: FxHashMap<H256, FxHashSet<OutPoint>>,
    /// address hash → pool txids touching it.
    tx_index: FxHashMap<H256, FxHashSet<H256>>,
    /// Recently confirmed txid → block hash.
    committed: LruCache<H256, H256>,
    /// Sum of entry memory footprints.
    size: u64,
    tip: H256,
    height: u32,
    free_count: f64,
    last_free_time: u64,
    /// Millisecond timestamp of the last content change.
    last_update: u64,
}

impl PoolInner {
    fn new(tip: H256, height: u32) -> Self {
        PoolInner {
            map: FxHashMap::default(),
            spents: FxHashMap::default(),
            coin_index: FxHashMap::default(),
            tx_index: FxHashMap::default(),
            committed: LruCache::new(COMMITTED_CACHE_SIZE),
            size: 0,
            tip,
            height,
            free_count: 0.0,
            last_free_time: 0,
            last_update: 0,
        }
    }
}

pub struct TransactionPool<C: ChainProvider> {
    pub config: PoolConfig,
    chain: Arc<C>,
    scripts: Arc<dyn ScriptVerifier>,
    estimator: Option<Mutex<Box<dyn FeeEstimator>>>,
    inner: RwLock<PoolInner>,
    orphans: RwLock<OrphanPool>,
    rejects: Mutex<RejectFilter>,
    cache: Option<Mutex<PersistentCache>>,
    /// Serializes admission and the reorg hooks.
    locker: Mutex<()>,
}

impl<C: ChainProvider> TransactionPool<C> {
    pub fn new(config: PoolConfig, chain: Arc<C>, scripts: Arc<dyn ScriptVerifier>) -> Self {
        let inner = PoolInner::new(chain.tip_hash(), chain.tip_height());
        TransactionPool {
            config,
            chain,
            scripts,
            estimator: None,
            inner: RwLock::new(inner),
            orphans: RwLock::new(OrphanPool::new()),
            rejects: Mutex::new(RejectFilter::new()),
            cache: None,
            locker: Mutex::new(()),
        }
    }

    pub fn with_estimator(mut self, estimator: Box<dyn FeeEstimator>) -> Self {
        self.estimator = Some(Mutex::new(estimator));
        self
    }

    /// Attach the persistent cache and rebuild the pool from it. Entries
    /// whose inputs no longer resolve are dropped from disk.
    pub fn with_cache(mut self, db: Arc<dyn KeyValueDB>) -> Self {
        let tip = self.chain.tip_hash();
        let mut cache = match PersistentCache::open(db, tip) {
            Ok(cache) => cache,
            Err(err) => {
                warn!(target: "pool", "mempool cache unavailable: {err}");
                return self;
            }
        };

        if let Some(raw) = cache.read_fees().ok().flatten() {
            if let Some(estimator) = &self.estimator {
                if !estimator.lock().inject(&raw) {
                    debug!(target: "pool", "discarding unreadable fee estimator state");
                }
            }
        }

        let mut loaded = Vec::new();
        match cache.load_entries() {
            Ok(entries) => {
                for (txid, raw) in entries {
                    match MempoolEntry::from_raw(&raw) {
                        Ok(entry) if entry.txid() == txid => loaded.push(entry),
                        _ => cache.remove_entry(&txid),
                    }
                }
            }
            Err(err) => warn!(target: "pool", "mempool cache read failed: {err}"),
        }
        // Parents were admitted before their children.
        loaded.sort_by_key(|entry| entry.time);

        self.cache = Some(Mutex::new(cache));

        let mut kept = 0usize;
        for mut entry in loaded {
            let txid = entry.txid();
            let ok = {
                let mut inner = self.inner.write();
                let (view, missing) = self.build_view(&inner, entry.tx());
                let spent = entry
                    .tx()
                    .input_points()
                    .any(|point| inner.spents.contains_key(point));
                if missing.is_empty() && !spent && check_inputs(entry.tx(), &view, entry.height).is_ok()
                {
                    entry.depends = self.parents_in_pool(&inner, &entry);
                    self.track_entry(&mut inner, entry, &view);
                    true
                } else {
                    false
                }
            };
            if ok {
                kept += 1;
            } else if let Some(cache) = &self.cache {
                cache.lock().remove_entry(&txid);
            }
        }
        if kept > 0 {
            info!(target: "pool", "restored {kept} mempool entries from cache");
        }
        self.flush_cache(true);
        self
    }

    // ------------------------------------------------------------------
    // Admission

    /// Validate and insert a transaction. `Ok(Some(parents))` means the
    /// transaction was orphaned on the listed missing parents.
    pub fn add_tx(
        &self,
        tx: IndexedTransaction,
        peer: u64,
    ) -> Result<Option<Vec<H256>>, VerifyError> {
        let _guard = self.locker.lock();

        let wtxid = tx.wtxid();
        let result = self.insert_tx(tx.clone(), peer);
        match &result {
            Ok(Some(_)) | Ok(None) => {}
            Err(err) => {
                if !err.malleated && err.category != RejectCategory::AlreadyKnown {
                    self.rejects.lock().insert(&wtxid);
                }
            }
        }

        if matches!(result, Ok(None)) {
            self.resolve_orphans(tx.txid());
        }
        self.flush_cache(false);
        result
    }

    fn insert_tx(
        &self,
        tx: IndexedTransaction,
        peer: u64,
    ) -> Result<Option<Vec<H256>>, VerifyError> {
        let txid = tx.txid();

        if self.rejects.lock().contains(&tx.wtxid()) {
            return Err(VerifyError::new(RejectCategory::AlreadyKnown, "duplicate", 0));
        }
        {
            let inner = self.inner.read();
            if inner.map.contains_key(&txid) {
                return Err(VerifyError::new(
                    RejectCategory::AlreadyKnown,
                    "txn-already-in-mempool",
                    0,
                ));
            }
            if inner.committed.contains(&txid) {
                return Err(VerifyError::new(
                    RejectCategory::AlreadyKnown,
                    "txn-already-known",
                    0,
                ));
            }
        }
        if self.orphans.read().has(&txid) {
            return Err(VerifyError::new(
                RejectCategory::AlreadyKnown,
                "txn-already-in-orphanage",
                0,
            ));
        }
        if self.chain.has_coins(&txid) {
            return Err(VerifyError::new(
                RejectCategory::AlreadyKnown,
                "txn-already-known",
                0,
            ));
        }

        check_sanity(&tx)?;
        if tx.is_coinbase() {
            return Err(VerifyError::invalid("coinbase", 100));
        }

        let features = self.chain.features();
        if self.config.require_standard {
            check_standard(&tx, features, &self.config)?;
        }

        if tx.has_witness() && !features.has_witness() && !self.config.premature_witness {
            // Stripping the witness could make this valid later; do not
            // let it poison the rejects filter.
            return Err(VerifyError::malleated(
                RejectCategory::Nonstandard,
                "no-witness-yet",
                0,
            ));
        }

        if !self.chain.verify_final(&tx, LockFlags::standard()) {
            return Err(VerifyError::nonstandard("non-final", 0));
        }

        let mut inner = self.inner.write();

        for point in tx.input_points() {
            if inner.spents.contains_key(point) {
                return Err(VerifyError::new(
                    RejectCategory::Duplicate,
                    "bad-txns-inputs-spent",
                    0,
                ));
            }
        }

        let (view, missing) = self.build_view(&inner, &tx);
        if !missing.is_empty() {
            drop(inner);
            return self.store_orphan(tx, missing, peer);
        }

        if !self.chain.verify_locks(&tx, &view, LockFlags::standard()) {
            return Err(VerifyError::nonstandard("non-BIP68-final", 0));
        }

        if self.config.require_standard {
            check_standard_inputs(&tx, &view)?;
        }

        let sigops = tx.sigop_cost(&view, VerifyFlags::standard());
        if sigops > MAX_TX_SIGOPS_COST {
            return Err(VerifyError::nonstandard("bad-txns-too-many-sigops", 0));
        }

        let height = self.chain.tip_height();
        let fee = check_inputs(&tx, &view, height + 1)?;

        let size = tx.vsize();
        let min_fee = self.config.min_fee(size);
        let priority = tx.priority(&view, height);

        if fee < min_fee {
            if self.config.relay_priority && priority < FREE_THRESHOLD {
                return Err(VerifyError::new(
                    RejectCategory::InsufficientFee,
                    "insufficient priority",
                    0,
                ));
            }
            if self.config.limit_free {
                let now = faketime::unix_time_as_millis();
                let elapsed = now.saturating_sub(inner.last_free_time) as f64;
                inner.free_count *= (-elapsed / FREE_DECAY_HALF_LIFE_MS).exp2();
                inner.last_free_time = now;

                if inner.free_count > self.config.limit_free_relay as f64 * 10_000.0 {
                    return Err(VerifyError::new(
                        RejectCategory::InsufficientFee,
                        "rate limited free transaction",
                        0,
                    ));
                }
                inner.free_count += size as f64;
            }
        }

        if self.config.reject_absurd_fees && fee > min_fee.saturating_mul(10_000).max(10_000) {
            return Err(VerifyError::new(
                RejectCategory::HighFee,
                "absurdly-high-fee",
                0,
            ));
        }

        if self.count_ancestors(&inner, &tx) > self.config.max_ancestors {
            return Err(VerifyError::nonstandard("too-long-mempool-chain", 0));
        }

        verify_scripts(self.scripts.as_ref(), &tx, &view, VerifyFlags::standard())?;
        if self.config.paranoid {
            verify_scripts_paranoid(self.scripts.as_ref(), &tx, &view);
        }

        let now = faketime::unix_time_as_millis() / 1000;
        let mut entry = MempoolEntry::new(tx, fee, sigops, priority, height + 1, now);
        entry.depends = self.parents_in_pool(&inner, &entry);

        if let Some(estimator) = &self.estimator {
            estimator
                .lock()
                .process_tx(&entry.txid(), entry.height, fee, size);
        }

        self.track_entry(&mut inner, entry, &view);

        if self.enforce_limit(&mut inner, &txid) {
            return Err(VerifyError::new(
                RejectCategory::InsufficientFee,
                "mempool full",
                0,
            ));
        }

        debug!(target: "pool", "added tx {txid} to mempool (txs={})", inner.map.len());
        Ok(None)
    }

    fn store_orphan(
        &self,
        tx: IndexedTransaction,
        missing: Vec<H256>,
        peer: u64,
    ) -> Result<Option<Vec<H256>>, VerifyError> {
        if tx.weight() > MAX_TX_WEIGHT {
            self.rejects.lock().insert(&tx.wtxid());
            debug!(target: "pool", "discarding oversized orphan {}", tx.txid());
            return Ok(Some(missing));
        }
        let rejected_parent = {
            let rejects = self.rejects.lock();
            missing.iter().any(|parent| rejects.contains(parent))
        };
        if rejected_parent {
            self.rejects.lock().insert(&tx.wtxid());
            debug!(target: "pool", "discarding orphan {} with rejected parent", tx.txid());
            return Ok(Some(missing));
        }

        let mut orphans = self.orphans.write();
        orphans.store(&tx, &missing, peer);
        let evicted = orphans.limit(self.config.max_orphans, &mut rand::thread_rng());
        for txid in evicted {
            debug!(target: "pool", "evicted random orphan {txid}");
        }
        Ok(Some(missing))
    }

    /// Revalidate orphans as their parents land. Failures are logged and,
    /// when not malleation-caused, added to the rejects filter; they never
    /// unwind into the caller.
    fn resolve_orphans(&self, parent: H256) {
        let mut queue = vec![parent];
        while let Some(parent) = queue.pop() {
            let ready = self.orphans.write().resolve(&parent);
            for (tx, peer) in ready {
                let txid = tx.txid();
                let wtxid = tx.wtxid();
                match self.insert_tx(tx, peer) {
                    Ok(None) => queue.push(txid),
                    Ok(Some(_)) => {}
                    Err(err) => {
                        debug!(target: "pool", "orphan {txid} failed revalidation: {err}");
                        if !err.malleated {
                            self.rejects.lock().insert(&wtxid);
                        }
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Reorg hooks

    /// A block was connected: drop its transactions from the pool, clean
    /// out conflicts, and reset the rejects filter.
    pub fn add_block(&self, hash: H256, height: u32, txs: &[IndexedTransaction]) {
        let _guard = self.locker.lock();
        let mut inner = self.inner.write();

        let mut confirmed = Vec::new();
        for tx in txs.iter().rev() {
            let txid = tx.txid();
            inner.committed.put(txid, hash);
            if inner.map.contains_key(&txid) {
                self.untrack_entry(&mut inner, &txid);
                confirmed.push(txid);
            } else {
                self.orphans.write().remove(&txid);
                self.remove_double_spends(&mut inner, tx);
            }
        }

        inner.tip = hash;
        inner.height = height;
        // Time-gated rules may have become true for past rejects.
        self.rejects.lock().reset();

        if let Some(estimator) = &self.estimator {
            let mut estimator = estimator.lock();
            estimator.process_block(height, &confirmed, self.chain.is_synced());
            if let Some(cache) = &self.cache {
                cache.lock().write_fees(estimator.to_raw());
            }
        }
        if let Some(cache) = &self.cache {
            cache.lock().sync_tip(&hash);
        }
        drop(inner);
        self.flush_cache(true);

        if !confirmed.is_empty() {
            debug!(target: "pool", "removed {} confirmed txs at block {hash}", confirmed.len());
        }
    }

    /// A block was disconnected: feed its transactions back through full
    /// admission. Failures are logged and dropped.
    pub fn remove_block(&self, txs: &[IndexedTransaction]) {
        let _guard = self.locker.lock();
        {
            let mut inner = self.inner.write();
            inner.tip = self.chain.tip_hash();
            inner.height = self.chain.tip_height();
            // These are no longer confirmed anywhere.
            for tx in txs {
                inner.committed.pop(&tx.txid());
            }
        }

        for tx in txs {
            if tx.is_coinbase() {
                continue;
            }
            if let Err(err) = self.insert_tx(tx.clone(), 0) {
                debug!(target: "pool", "could not re-add reorged tx {}: {err}", tx.txid());
            }
        }

        if let Some(cache) = &self.cache {
            cache.lock().sync_tip(&self.chain.tip_hash());
        }
        self.flush_cache(true);
    }

    // ------------------------------------------------------------------
    // Queries

    pub fn get_tx(&self, txid: &H256) -> Option<IndexedTransaction> {
        self.inner.read().map.get(txid).map(|e| e.tx().clone())
    }

    pub fn get_entry(&self, txid: &H256) -> Option<MempoolEntry> {
        self.inner.read().map.get(txid).cloned()
    }

    pub fn has_entry(&self, txid: &H256) -> bool {
        self.inner.read().map.contains_key(txid)
    }

    /// In the pool or the orphanage.
    pub fn has(&self, txid: &H256) -> bool {
        self.has_entry(txid) || self.orphans.read().has(txid)
    }

    pub fn has_reject(&self, hash: &H256) -> bool {
        self.rejects.lock().contains(hash)
    }

    /// An unspent pool output.
    pub fn get_coin(&self, point: &OutPoint) -> Option<Coin> {
        let inner = self.inner.read();
        if inner.spents.contains_key(point) {
            return None;
        }
        let entry = inner.map.get(&point.txid)?;
        let output = entry.tx().outputs.get(point.index as usize)?;
        Some(Coin::from_output(
            output,
            UNCONFIRMED_HEIGHT,
            false,
            entry.tx().version,
        ))
    }

    pub fn is_spent(&self, point: &OutPoint) -> Option<H256> {
        self.inner.read().spents.get(point).copied()
    }

    /// Metadata for a transaction in the pool or the orphanage.
    pub fn get_meta(&self, txid: &H256) -> Option<TxMeta> {
        if let Some(entry) = self.get_entry(txid) {
            return Some(TxMeta {
                tx: entry.tx().clone(),
                height: Some(entry.height),
                time: Some(entry.time),
                orphan: false,
            });
        }
        let orphans = self.orphans.read();
        let orphan = orphans.get(txid)?;
        let tx = ember_core::transaction::Transaction::from_bytes(&orphan.raw).ok()?;
        Some(TxMeta {
            tx: tx.into(),
            height: None,
            time: None,
            orphan: true,
        })
    }

    pub fn get_ancestors(&self, txid: &H256) -> Vec<H256> {
        let inner = self.inner.read();
        match inner.map.get(txid) {
            Some(entry) => self.ancestors(&inner, entry.tx()).into_iter().collect(),
            None => Vec::new(),
        }
    }

    pub fn get_descendants(&self, txid: &H256) -> Vec<H256> {
        let inner = self.inner.read();
        self.descendants(&inner, txid).into_iter().collect()
    }

    pub fn count_ancestors_of(&self, txid: &H256) -> usize {
        self.get_ancestors(txid).len()
    }

    pub fn count_descendants_of(&self, txid: &H256) -> usize {
        self.get_descendants(txid).len()
    }

    /// Direct in-pool parents recorded at insertion.
    pub fn get_depends(&self, txid: &H256) -> Vec<H256> {
        self.inner
            .read()
            .map
            .get(txid)
            .map(|e| e.depends.clone())
            .unwrap_or_default()
    }

    /// All pool txids.
    pub fn get_snapshot(&self) -> Vec<H256> {
        self.inner.read().map.keys().copied().collect()
    }

    /// All pool transactions.
    pub fn get_history(&self) -> Vec<IndexedTransaction> {
        self.inner
            .read()
            .map
            .values()
            .map(|e| e.tx().clone())
            .collect()
    }

    /// Entries cloned out for template building.
    pub fn get_entries(&self) -> Vec<MempoolEntry> {
        self.inner.read().map.values().cloned().collect()
    }

    pub fn get_coins_by_address(&self, hash: &H256) -> Vec<OutPoint> {
        self.inner
            .read()
            .coin_index
            .get(hash)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn get_tx_by_address(&self, hash: &H256) -> Vec<H256> {
        self.inner
            .read()
            .tx_index
            .get(hash)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn info(&self) -> MempoolInfo {
        let inner = self.inner.read();
        MempoolInfo {
            total_tx: inner.map.len(),
            total_orphans: self.orphans.read().len(),
            bytes: inner.map.values().map(|e| e.tx().total_size()).sum(),
            usage: inner.size,
            max_size: self.config.max_size,
            min_relay: self.config.min_relay,
        }
    }

    pub fn total_tx(&self) -> usize {
        self.inner.read().map.len()
    }

    pub fn total_orphans(&self) -> usize {
        self.orphans.read().len()
    }

    pub fn tip(&self) -> H256 {
        self.inner.read().tip
    }

    /// Millisecond timestamp of the last content change; template caches
    /// and the longpoll engine key their staleness off this.
    pub fn last_updated(&self) -> u64 {
        self.inner.read().last_update
    }

    // ------------------------------------------------------------------
    // Prioritisation

    /// Nudge an entry's priority and effective fee. Descendant counters of
    /// every ancestor follow the fee delta.
    pub fn prioritise(&self, txid: &H256, pri_delta: f64, fee_delta: i64) -> bool {
        let _guard = self.locker.lock();
        let mut inner = self.inner.write();

        let tx = match inner.map.get(txid) {
            Some(entry) => entry.tx().clone(),
            None => return false,
        };

        let ancestors = self.ancestors(&inner, &tx);
        for ancestor in &ancestors {
            if let Some(entry) = inner.map.get_mut(ancestor) {
                entry.desc_fee += fee_delta;
            }
        }

        let entry = inner.map.get_mut(txid).expect("checked above");
        entry.delta_fee += fee_delta;
        entry.desc_fee += fee_delta;
        entry.priority += pri_delta;
        let raw = entry.to_raw();

        if let Some(cache) = &self.cache {
            cache.lock().save_entry(txid, raw);
        }
        if fee_delta != 0 || pri_delta != 0.0 {
            debug!(target: "pool", "prioritised {txid} (fee {fee_delta:+}, priority {pri_delta:+})");
        }
        true
    }

    // ------------------------------------------------------------------
    // Internals

    /// Assemble a coin view for a transaction from in-pool parents and the
    /// chain. Returns the view and the txids of unknown parents.
    fn build_view(
        &self,
        inner: &PoolInner,
        tx: &IndexedTransaction,
    ) -> (CoinView, Vec<H256>) {
        let mut view = CoinView::new();
        let mut missing = Vec::new();
        for input in &tx.inputs {
            let parent = input.prev_out.txid;
            if let Some(entry) = inner.map.get(&parent) {
                if inner.spents.contains_key(&input.prev_out) {
                    continue;
                }
                if let Some(output) = entry.tx().outputs.get(input.prev_out.index as usize) {
                    view.add_output(
                        input.prev_out,
                        output,
                        UNCONFIRMED_HEIGHT,
                        false,
                        entry.tx().version,
                    );
                }
            } else if !view.read_coins(self.chain.as_ref(), &parent) && !missing.contains(&parent)
            {
                missing.push(parent);
            }
        }
        (view, missing)
    }

    fn parents_in_pool(&self, inner: &PoolInner, entry: &MempoolEntry) -> Vec<H256> {
        let mut parents = Vec::new();
        for input in &entry.tx().inputs {
            let parent = input.prev_out.txid;
            if inner.map.contains_key(&parent) && !parents.contains(&parent) {
                parents.push(parent);
            }
        }
        parents
    }

    /// Transitive in-pool ancestors, bounded DFS with a visited set.
    fn ancestors(&self, inner: &PoolInner, tx: &IndexedTransaction) -> FxHashSet<H256> {
        let mut visited = FxHashSet::default();
        let mut stack: Vec<H256> = tx
            .input_points()
            .map(|point| point.txid)
            .filter(|txid| inner.map.contains_key(txid))
            .collect();
        while let Some(txid) = stack.pop() {
            if !visited.insert(txid) {
                continue;
            }
            if let Some(entry) = inner.map.get(&txid) {
                for point in entry.tx().input_points() {
                    if inner.map.contains_key(&point.txid) && !visited.contains(&point.txid) {
                        stack.push(point.txid);
                    }
                }
            }
        }
        visited
    }

    fn count_ancestors(&self, inner: &PoolInner, tx: &IndexedTransaction) -> usize {
        self.ancestors(inner, tx).len()
    }

    /// Transitive in-pool spenders of a txid's outputs.
    fn descendants(&self, inner: &PoolInner, txid: &H256) -> FxHashSet<H256> {
        let mut visited = FxHashSet::default();
        let mut stack = vec![*txid];
        while let Some(current) = stack.pop() {
            for child in self.spenders(inner, &current) {
                if visited.insert(child) {
                    stack.push(child);
                }
            }
        }
        visited
    }

    fn spenders(&self, inner: &PoolInner, txid: &H256) -> Vec<H256> {
        let entry = match inner.map.get(txid) {
            Some(entry) => entry,
            None => return Vec::new(),
        };
        entry
            .tx()
            .output_points()
            .iter()
            .filter_map(|point| inner.spents.get(point).copied())
            .collect()
    }

    /// Insert a verified entry and fold its delta into every ancestor's
    /// descendant counters.
    fn track_entry(&self, inner: &mut PoolInner, entry: MempoolEntry, view: &CoinView) {
        let txid = entry.txid();

        for ancestor in self.ancestors(inner, entry.tx()) {
            if let Some(parent) = inner.map.get_mut(&ancestor) {
                parent.desc_fee += entry.delta_fee;
                parent.desc_size += entry.size;
            }
        }

        for input in &entry.tx().inputs {
            inner.spents.insert(input.prev_out, txid);
        }
        inner.size += entry.mem_usage();

        if self.config.index_address {
            for (index, output) in entry.tx().outputs.iter().enumerate() {
                if let Some(hash) = output.script.address_hash() {
                    let point = OutPoint::new(txid, index as u32);
                    inner.coin_index.entry(hash).or_default().insert(point);
                    inner.tx_index.entry(hash).or_default().insert(txid);
                }
            }
            for input in &entry.tx().inputs {
                if let Some(coin) = view.get_output(&input.prev_out) {
                    if let Some(hash) = coin.script.address_hash() {
                        inner.tx_index.entry(hash).or_default().insert(txid);
                        if let Some(set) = inner.coin_index.get_mut(&hash) {
                            set.remove(&input.prev_out);
                        }
                    }
                }
            }
        }

        if let Some(cache) = &self.cache {
            cache.lock().save_entry(&txid, entry.to_raw());
        }
        inner.map.insert(txid, entry);
        inner.last_update = faketime::unix_time_as_millis();
    }

    /// Remove one entry and unfold its delta from its ancestors. Callers
    /// must have removed (or be removing) its spenders first.
    fn untrack_entry(&self, inner: &mut PoolInner, txid: &H256) -> Option<MempoolEntry> {
        let entry = inner.map.remove(txid)?;

        for ancestor in self.ancestors(inner, entry.tx()) {
            if let Some(parent) = inner.map.get_mut(&ancestor) {
                parent.desc_fee -= entry.delta_fee;
                parent.desc_size -= entry.size;
            }
        }

        for input in &entry.tx().inputs {
            inner.spents.remove(&input.prev_out);
        }
        inner.size -= entry.mem_usage();

        if self.config.index_address {
            for (index, output) in entry.tx().outputs.iter().enumerate() {
                if let Some(hash) = output.script.address_hash() {
                    let point = OutPoint::new(*txid, index as u32);
                    if let Some(set) = inner.coin_index.get_mut(&hash) {
                        set.remove(&point);
                        if set.is_empty() {
                            inner.coin_index.remove(&hash);
                        }
                    }
                    if let Some(set) = inner.tx_index.get_mut(&hash) {
                        set.remove(txid);
                        if set.is_empty() {
                            inner.tx_index.remove(&hash);
                        }
                    }
                }
            }
            for input in &entry.tx().inputs {
                let parent = input.prev_out.txid;
                if let Some(parent_entry) = inner.map.get(&parent) {
                    let output = parent_entry
                        .tx()
                        .outputs
                        .get(input.prev_out.index as usize)
                        .cloned();
                    if let Some(output) = output {
                        if let Some(hash) = output.script.address_hash() {
                            inner
                                .coin_index
                                .entry(hash)
                                .or_default()
                                .insert(input.prev_out);
                            if let Some(set) = inner.tx_index.get_mut(&hash) {
                                set.remove(txid);
                                if set.is_empty() {
                                    inner.tx_index.remove(&hash);
                                }
                            }
                        }
                    }
                }
            }
        }

        if let Some(cache) = &self.cache {
            cache.lock().remove_entry(txid);
        }
        inner.last_update = faketime::unix_time_as_millis();
        Some(entry)
    }

    /// Remove an entry and its whole spender sub-tree, spenders first so no
    /// dangling `spents` remain. Returns the removed ids.
    fn evict_subtree(&self, inner: &mut PoolInner, txid: &H256) -> Vec<H256> {
        let mut removed = Vec::new();
        for child in self.spenders(inner, txid) {
            removed.extend(self.evict_subtree(inner, &child));
        }
        if self.untrack_entry(inner, txid).is_some() {
            removed.push(*txid);
        }
        removed
    }

    /// Remove everything in the pool conflicting with a confirmed tx.
    fn remove_double_spends(&self, inner: &mut PoolInner, tx: &IndexedTransaction) {
        for point in tx.input_points() {
            if let Some(spender) = inner.spents.get(point).copied() {
                let removed = self.evict_subtree(inner, &spender);
                debug!(target: "pool",
                    "removed {} double-spends of {point:?}", removed.len());
                self.notify_removed(&removed);
            }
        }
    }

    fn notify_removed(&self, txids: &[H256]) {
        if let Some(estimator) = &self.estimator {
            let mut estimator = estimator.lock();
            for txid in txids {
                estimator.remove_tx(txid);
            }
        }
    }

    /// Enforce the memory budget. Expired parent-free packages go first,
    /// then the lowest package rates, until a tenth of the budget is free
    /// again. Returns whether `added` was itself evicted.
    fn enforce_limit(&self, inner: &mut PoolInner, added: &H256) -> bool {
        if inner.size <= self.config.max_size {
            return false;
        }

        let now = faketime::unix_time_as_millis() / 1000;
        let roots: Vec<H256> = inner
            .map
            .values()
            .filter(|entry| entry.depends.iter().all(|dep| !inner.map.contains_key(dep)))
            .map(|entry| entry.txid())
            .collect();

        for txid in &roots {
            let expired = inner
                .map
                .get(txid)
                .map_or(false, |e| now.saturating_sub(e.time) > self.config.expiry_time);
            if expired {
                let removed = self.evict_subtree(inner, txid);
                debug!(target: "pool", "expired package of {} txs at {txid}", removed.len());
                self.notify_removed(&removed);
            }
        }

        let mut heap: BinaryHeap<Reverse<(EvictKey, H256)>> = inner
            .map
            .values()
            .filter(|entry| entry.depends.iter().all(|dep| !inner.map.contains_key(dep)))
            .map(|entry| Reverse((entry.evict_key(), entry.txid())))
            .collect();

        let target = self.config.max_size - self.config.max_size / 10;
        while inner.size > target {
            let Reverse((_, txid)) = match heap.pop() {
                Some(item) => item,
                None => break,
            };
            if !inner.map.contains_key(&txid) {
                continue;
            }
            let removed = self.evict_subtree(inner, &txid);
            debug!(target: "pool", "evicted package of {} txs at {txid}", removed.len());
            self.notify_removed(&removed);
        }

        !inner.map.contains_key(added)
    }

    fn flush_cache(&self, force: bool) {
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.lock().flush(force) {
                warn!(target: "pool", "mempool cache flush failed: {err}");
            }
        }
    }

    /// Check the pool's internal accounting invariants. Test support.
    #[doc(hidden)]
    pub fn assert_consistent(&self) {
        let inner = self.inner.read();
        let usage: u64 = inner.map.values().map(|e| e.mem_usage()).sum();
        assert_eq!(usage, inner.size, "size must equal the sum of footprints");
        for (point, spender) in &inner.spents {
            let entry = inner.map.get(spender).expect("spender must be tracked");
            assert!(
                entry.tx().input_points().any(|p| p == point),
                "spents must point at an actual input"
            );
        }
        for entry in inner.map.values() {
            assert!(entry.desc_fee >= entry.delta_fee);
            assert!(entry.desc_size >= entry.size);
        }
    }
}
