//! The getwork / longpoll engine.
//!
//! Hands out 128-byte legacy work units over a rolling extranonce space,
//! remembers which merkle root belongs to which extranonce pair, and
//! re-associates submitted headers with the exact coinbase they commit to.

use crate::block_assembler::BlockAssemblerController;
use crate::block_template::{BlockTemplate, Nonces};
use crate::error::MinerError;
use ember_core::block::Block;
use ember_core::header::{Header, HEADER_SIZE};
use ember_core::transaction::IndexedTransaction;
use ember_hash::H256;
use ember_pool::TransactionPool;
use ember_traits::{ChainError, ChainProvider};
use ember_util::Mutex;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Padded getwork payload size.
pub const WORK_DATA_SIZE: usize = 128;

/// A fresh attempt is cut when the mempool has been active for this long.
const ATTEMPT_REFRESH_MS: u64 = 10_000;

/// One unit of work for a getwork client.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub data: [u8; WORK_DATA_SIZE],
    /// Big-endian target.
    pub target: [u8; 32],
    pub height: u32,
}

impl WorkUnit {
    pub fn data_hex(&self) -> String {
        hex::encode(self.data)
    }

    /// Little-endian target hex, the form getwork clients expect.
    pub fn target_hex(&self) -> String {
        ember_core::difficulty::target_to_le_hex(&self.target)
    }
}

struct WorkState {
    attempt: Option<BlockTemplate>,
    attempt_created: u64,
    nonce1: u32,
    nonce2: u32,
    merkle_map: FxHashMap<H256, Nonces>,
    pollers: Vec<Sender<()>>,
    /// Mempool update stamp the current attempt was built against.
    last_activity: u64,
}

pub struct WorkEngine<C: ChainProvider> {
    chain: Arc<C>,
    pool: Arc<TransactionPool<C>>,
    assembler: BlockAssemblerController,
    state: Mutex<WorkState>,
}

impl<C: ChainProvider> WorkEngine<C> {
    pub fn new(
        chain: Arc<C>,
        pool: Arc<TransactionPool<C>>,
        assembler: BlockAssemblerController,
    ) -> Self {
        WorkEngine {
            chain,
            pool,
            assembler,
            state: Mutex::new(WorkState {
                attempt: None,
                attempt_created: 0,
                nonce1: 0,
                nonce2: 0,
                merkle_map: FxHashMap::default(),
                pollers: Vec::new(),
                last_activity: 0,
            }),
        }
    }

    /// Produce a work unit, rolling the extranonce and recording the merkle
    /// root so the submission can be re-associated later.
    pub fn create_work(&self) -> Result<WorkUnit, MinerError> {
        let mut state = self.state.lock();
        self.poll_refresh(&mut state);

        if state.attempt.is_none() {
            let (template, _) = self.assembler.create_template(Vec::new())?;
            state.last_activity = self.pool.last_updated();
            state.attempt_created = faketime::unix_time_as_millis();
            state.nonce1 = 0;
            state.nonce2 = 0;
            state.merkle_map.clear();
            state.attempt = Some(template);
        } else if let Some(attempt) = state.attempt.as_mut() {
            let now = self.chain.now().max(attempt.mtp + 1) as u32;
            attempt.time = attempt.time.max(now);
        }

        // Roll the extranonce, wrapping nonce2 into nonce1.
        state.nonce2 = state.nonce2.wrapping_add(1);
        if state.nonce2 == 0 {
            state.nonce1 = state.nonce1.wrapping_add(1);
        }
        let nonces = Nonces {
            nonce1: state.nonce1,
            nonce2: state.nonce2,
        };

        let attempt = state.attempt.as_ref().expect("attempt ensured above");
        let root = attempt.merkle_root(nonces);
        let header = attempt.header(root, attempt.time, 0);
        let unit = WorkUnit {
            data: pad_work_data(&header.encode()),
            target: attempt.target,
            height: attempt.height,
        };
        state.merkle_map.insert(root, nonces);
        Ok(unit)
    }

    /// Validate a 128-byte submission. `Ok(false)` for any structural
    /// mismatch; chain-internal failures are passed through.
    pub fn submit_work(&self, data: &[u8]) -> Result<bool, MinerError> {
        if data.len() != WORK_DATA_SIZE {
            return Ok(false);
        }
        let mut raw = data.to_vec();
        swap_work_words(&mut raw);
        let header = match Header::from_bytes(&raw[..HEADER_SIZE]) {
            Ok(header) => header,
            Err(_) => return Ok(false),
        };

        let mut state = self.state.lock();
        let attempt = match &state.attempt {
            Some(attempt) => attempt,
            None => return Ok(false),
        };
        if header.prev_block != attempt.prev_block || header.bits != attempt.bits {
            debug!(target: "miner", "stale work submitted for {}", header.prev_block);
            return Ok(false);
        }
        if !header.verify_pow() {
            return Ok(false);
        }
        let nonces = match state.merkle_map.get(&header.merkle_root) {
            Some(nonces) => *nonces,
            None => {
                debug!(target: "miner", "unknown merkle root {}", header.merkle_root);
                return Ok(false);
            }
        };

        let block = attempt.commit(nonces, header.time, header.nonce);
        match self.connect(&mut state, block) {
            Ok(()) => Ok(true),
            Err(ChainError::Internal(reason)) => {
                Err(MinerError::Chain(ChainError::Internal(reason)))
            }
            Err(err) => {
                warn!(target: "miner", "submitted work rejected: {err}");
                Ok(false)
            }
        }
    }

    /// Submit a fully-formed block, e.g. from `submitblock` or the CPU
    /// miner. `None` on acceptance, a `rejected: <reason>` string
    /// otherwise; internal failures propagate.
    pub fn add_block(&self, mut block: Block) -> Result<Option<String>, MinerError> {
        let mut state = self.state.lock();

        // Some pool software (eloipool) strips the coinbase witness while
        // leaving the commitment output in place. Restore the zero nonce,
        // but only when the block does not witness-commit on its own.
        if block.witness_commitment().is_some() {
            if let Some(coinbase) = block.transactions.first() {
                if coinbase.inputs[0].witness.is_empty() {
                    let mut tx = coinbase.transaction.clone();
                    tx.inputs[0].witness = vec![vec![0u8; 32]];
                    block.transactions[0] = IndexedTransaction::from(tx);
                }
            }
        }

        match self.connect(&mut state, block) {
            Ok(()) => Ok(None),
            Err(ChainError::BadPrevBlock) => Ok(Some("rejected: bad-prevblk".to_string())),
            Err(ChainError::Verify { reason }) => Ok(Some(format!("rejected: {reason}"))),
            Err(err @ ChainError::Internal(_)) => Err(MinerError::Chain(err)),
        }
    }

    /// Connect a block and run the mempool hook; on success the current
    /// attempt is obsolete.
    fn connect(&self, state: &mut WorkState, block: Block) -> Result<(), ChainError> {
        let hash = block.hash();
        let txs = block.transactions.clone();
        self.chain.add_block(block)?;
        let height = self.chain.tip_height();
        info!(target: "miner", "connected block {hash} at height {height}");
        self.pool.add_block(hash, height, &txs);
        self.refresh_inner(state);
        Ok(())
    }

    /// Register a longpoller; the receiver fires on the next refresh.
    pub fn longpoll(&self) -> Receiver<()> {
        let (tx, rx) = bounded(1);
        self.state.lock().pollers.push(tx);
        rx
    }

    /// Route a longpoll id: `None` means the caller's state is already
    /// stale and it should be answered immediately.
    pub fn handle_longpoll(&self, lpid: &str) -> Result<Option<Receiver<()>>, MinerError> {
        if lpid.len() != 74 {
            return Err(MinerError::BadData("invalid longpoll id".to_string()));
        }
        let prev = H256::from_rev_hex(&lpid[..64])
            .ok_or_else(|| MinerError::BadData("invalid longpoll id".to_string()))?;
        if lpid[64..].chars().any(|c| !c.is_ascii_digit()) {
            return Err(MinerError::BadData("invalid longpoll id".to_string()));
        }

        if prev != self.chain.tip_hash() {
            return Ok(None);
        }
        Ok(Some(self.longpoll()))
    }

    /// Throw away the current attempt and wake every longpoller, FIFO.
    pub fn refresh_block(&self) {
        let mut state = self.state.lock();
        self.refresh_inner(&mut state);
    }

    fn refresh_inner(&self, state: &mut WorkState) {
        state.attempt = None;
        state.merkle_map.clear();
        state.nonce1 = 0;
        state.nonce2 = 0;
        for poller in state.pollers.drain(..) {
            let _ = poller.send(());
        }
    }

    /// Drop the attempt when the tip moved or the mempool has been active
    /// for a while under it.
    fn poll_refresh(&self, state: &mut WorkState) {
        let stale = match &state.attempt {
            Some(attempt) => {
                attempt.prev_block != self.chain.tip_hash()
                    || (self.pool.last_updated() != state.last_activity
                        && faketime::unix_time_as_millis()
                            .saturating_sub(state.attempt_created)
                            >= ATTEMPT_REFRESH_MS)
            }
            None => false,
        };
        if stale {
            self.refresh_inner(state);
        }
    }

    pub fn has_attempt(&self) -> bool {
        self.state.lock().attempt.is_some()
    }

    /// Clone out the current attempt, cutting one if needed. Used by the
    /// CPU miner, which commits locally instead of via the merkle map.
    pub fn create_attempt(&self) -> Result<BlockTemplate, MinerError> {
        let mut state = self.state.lock();
        self.poll_refresh(&mut state);
        if state.attempt.is_none() {
            let (template, _) = self.assembler.create_template(Vec::new())?;
            state.last_activity = self.pool.last_updated();
            state.attempt_created = faketime::unix_time_as_millis();
            state.attempt = Some(template);
        }
        Ok(state.attempt.clone().expect("ensured above"))
    }
}

/// Pad an 80-byte header to the legacy 128-byte getwork payload: a 0x80
/// terminator and the big-endian bit length in the final eight bytes, then
/// a byte swap over every 32-bit word.
pub fn pad_work_data(header: &[u8; HEADER_SIZE]) -> [u8; WORK_DATA_SIZE] {
    let mut data = [0u8; WORK_DATA_SIZE];
    data[..HEADER_SIZE].copy_from_slice(header);
    data[HEADER_SIZE] = 0x80;
    data[120..].copy_from_slice(&(HEADER_SIZE as u64 * 8).to_be_bytes());
    swap_work_words(&mut data);
    data
}

/// Reverse each 4-byte word in place; its own inverse.
pub fn swap_work_words(data: &mut [u8]) {
    for word in data.chunks_exact_mut(4) {
        word.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_is_involutive() {
        let mut data: Vec<u8> = (0u8..128).collect();
        let original = data.clone();
        swap_work_words(&mut data);
        assert_ne!(data, original);
        swap_work_words(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn padding_layout() {
        let header = [7u8; HEADER_SIZE];
        let mut data = pad_work_data(&header);
        swap_work_words(&mut data);
        assert_eq!(&data[..HEADER_SIZE], &header);
        assert_eq!(data[HEADER_SIZE], 0x80);
        assert!(data[81..120].iter().all(|b| *b == 0));
        assert_eq!(&data[120..], &640u64.to_be_bytes());
    }
}
