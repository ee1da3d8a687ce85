//! In-memory stand-ins for the external collaborators, used across the
//! workspace's tests: a controllable chain, script verifiers, and a flat
//! fee estimator.

use ember_core::coins::{Coin, CoinView, Coins};
use ember_core::header::Header;
use ember_core::script::{Script, VerifyFlags};
use ember_core::transaction::{
    IndexedTransaction, OutPoint, Transaction, TxInput, TxOutput,
};
use ember_core::{block::Block, SEQUENCE_FINAL};
use ember_hash::{sha256d, H256};
use ember_traits::{
    ChainError, ChainFeatures, ChainProvider, Deployment, FeeEstimator, LockFlags, ScriptError,
    ScriptVerifier, ThresholdState,
};
use ember_util::Mutex;
use rustc_hash::FxHashMap;

const SEQUENCE_DISABLE_FLAG: u32 = 1 << 31;
const SEQUENCE_TYPE_FLAG: u32 = 1 << 22;
const SEQUENCE_MASK: u32 = 0xffff;

struct MockState {
    tip: H256,
    height: u32,
    features: ChainFeatures,
    mtp: u64,
    time: u64,
    bits: u32,
    synced: bool,
    coins: FxHashMap<H256, Coins>,
    hashes: FxHashMap<u32, H256>,
    headers: FxHashMap<H256, Header>,
    deployments: Vec<(Deployment, ThresholdState)>,
    blocks: Vec<Block>,
    check_pow: bool,
}

/// A chain the test drives by hand: coins, tip, features and deployment
/// states are all settable.
pub struct MockChain {
    state: Mutex<MockState>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        // Start a hundred blocks in so funded coins are comfortably mature.
        let genesis = sha256d(b"genesis");
        let mut hashes = FxHashMap::default();
        hashes.insert(100, genesis);
        MockChain {
            state: Mutex::new(MockState {
                tip: genesis,
                height: 100,
                features: ChainFeatures::all(),
                mtp: 1_600_000_000,
                time: 1_600_000_600,
                bits: 0x207f_ffff,
                synced: true,
                coins: FxHashMap::default(),
                hashes,
                headers: FxHashMap::default(),
                deployments: Vec::new(),
                blocks: Vec::new(),
                check_pow: false,
            }),
        }
    }

    pub fn set_features(&self, features: ChainFeatures) {
        self.state.lock().features = features;
    }

    pub fn set_tip(&self, tip: H256, height: u32) {
        let mut state = self.state.lock();
        state.tip = tip;
        state.height = height;
        state.hashes.insert(height, tip);
    }

    pub fn set_mtp(&self, mtp: u64) {
        self.state.lock().mtp = mtp;
    }

    pub fn set_time(&self, time: u64) {
        self.state.lock().time = time;
    }

    pub fn set_bits(&self, bits: u32) {
        self.state.lock().bits = bits;
    }

    pub fn set_synced(&self, synced: bool) {
        self.state.lock().synced = synced;
    }

    pub fn set_check_pow(&self, check: bool) {
        self.state.lock().check_pow = check;
    }

    pub fn set_deployment(&self, deployment: Deployment, state: ThresholdState) {
        self.state.lock().deployments.push((deployment, state));
    }

    /// Register a confirmed transaction's outputs as spendable coins.
    pub fn add_coins(&self, tx: &IndexedTransaction, height: u32) {
        let (txid, coins) = Coins::from_tx(tx, tx.txid(), height);
        self.state.lock().coins.insert(txid, coins);
    }

    pub fn remove_coins(&self, txid: &H256) {
        self.state.lock().coins.remove(txid);
    }

    pub fn spend_coin(&self, point: &OutPoint) {
        let mut state = self.state.lock();
        if let Some(coins) = state.coins.get_mut(&point.txid) {
            coins.remove(point.index);
            if coins.is_empty() {
                state.coins.remove(&point.txid);
            }
        }
    }

    /// Blocks accepted through `add_block`.
    pub fn submitted_blocks(&self) -> Vec<Block> {
        self.state.lock().blocks.clone()
    }

    /// Recreate a single spendable coin at an exact outpoint.
    pub fn refund(&self, point: OutPoint, value: u64, script: Script) {
        let mut state = self.state.lock();
        let coins = state
            .coins
            .entry(point.txid)
            .or_insert_with(|| Coins::new(1, 1, false));
        coins.insert(
            point.index,
            Coin {
                value,
                script,
                height: 1,
                coinbase: false,
                version: 1,
            },
        );
    }

    /// Create a mature funding coin and return the outpoint spending it.
    pub fn fund(&self, value: u64, script: Script) -> OutPoint {
        let nonce = self.state.lock().coins.len() as u64;
        let tx: IndexedTransaction = Transaction {
            version: 1,
            inputs: vec![TxInput::new(
                OutPoint::new(sha256d(&nonce.to_le_bytes()), 0),
                Script::default(),
                SEQUENCE_FINAL,
            )],
            outputs: vec![TxOutput::new(value, script)],
            locktime: 0,
        }
        .into();
        self.add_coins(&tx, 1);
        OutPoint::new(tx.txid(), 0)
    }
}

impl ChainProvider for MockChain {
    fn tip_hash(&self) -> H256 {
        self.state.lock().tip
    }

    fn tip_height(&self) -> u32 {
        self.state.lock().height
    }

    fn is_synced(&self) -> bool {
        self.state.lock().synced
    }

    fn features(&self) -> ChainFeatures {
        self.state.lock().features
    }

    fn median_time_past(&self) -> u64 {
        self.state.lock().mtp
    }

    fn now(&self) -> u64 {
        self.state.lock().time
    }

    fn get_coins(&self, txid: &H256) -> Option<Coins> {
        self.state.lock().coins.get(txid).cloned()
    }

    fn get_block_hash(&self, height: u32) -> Option<H256> {
        self.state.lock().hashes.get(&height).copied()
    }

    fn get_header(&self, hash: &H256) -> Option<Header> {
        self.state.lock().headers.get(hash).copied()
    }

    fn next_bits(&self) -> u32 {
        self.state.lock().bits
    }

    fn subsidy(&self, _height: u32) -> u64 {
        50 * 100_000_000
    }

    fn deployments(&self) -> Vec<Deployment> {
        self.state
            .lock()
            .deployments
            .iter()
            .map(|(deployment, _)| deployment.clone())
            .collect()
    }

    fn deployment_state(&self, deployment: &Deployment) -> ThresholdState {
        self.state
            .lock()
            .deployments
            .iter()
            .find(|(candidate, _)| candidate.name == deployment.name)
            .map(|(_, state)| *state)
            .unwrap_or(ThresholdState::Defined)
    }

    fn verify_final(&self, tx: &IndexedTransaction, flags: LockFlags) -> bool {
        let state = self.state.lock();
        let mtp = if flags.contains(LockFlags::MEDIAN_TIME_PAST) {
            state.mtp
        } else {
            state.time
        };
        tx.is_final(state.height + 1, mtp)
    }

    fn verify_locks(&self, tx: &IndexedTransaction, view: &CoinView, _flags: LockFlags) -> bool {
        if tx.version < 2 {
            return true;
        }
        let state = self.state.lock();
        for input in &tx.inputs {
            let sequence = input.sequence;
            if sequence & SEQUENCE_DISABLE_FLAG != 0 {
                continue;
            }
            // Time-based locks resolve against block times this mock does
            // not model; only height locks are enforced.
            if sequence & SEQUENCE_TYPE_FLAG != 0 {
                continue;
            }
            let required = sequence & SEQUENCE_MASK;
            let coin_height = match view.get_height(&input.prev_out) {
                Some(height) if height != ember_core::coins::UNCONFIRMED_HEIGHT => height,
                _ => state.height + 1,
            };
            if state.height + 1 < coin_height + required {
                return false;
            }
        }
        true
    }

    fn add_block(&self, block: Block) -> Result<(), ChainError> {
        let mut state = self.state.lock();
        if block.header.prev_block != state.tip {
            return Err(ChainError::BadPrevBlock);
        }
        if state.check_pow && !block.header.verify_pow() {
            return Err(ChainError::Verify {
                reason: "high-hash".to_string(),
            });
        }
        if !block.check_merkle_root() {
            return Err(ChainError::Verify {
                reason: "bad-txnmrklroot".to_string(),
            });
        }

        let hash = block.hash();
        let height = state.height + 1;
        state.tip = hash;
        state.height = height;
        state.hashes.insert(height, hash);
        state.headers.insert(hash, block.header);
        for tx in &block.transactions {
            let (txid, coins) = Coins::from_tx(tx, tx.txid(), height);
            state.coins.insert(txid, coins);
            if !tx.is_coinbase() {
                for point in tx.input_points().copied().collect::<Vec<_>>() {
                    if let Some(coins) = state.coins.get_mut(&point.txid) {
                        coins.remove(point.index);
                    }
                }
            }
        }
        state.blocks.push(block);
        Ok(())
    }
}

/// Script verifier that fails whenever the given flags are requested.
/// With empty `fail_flags` it accepts everything.
pub struct FlagFailVerifier {
    pub fail_flags: VerifyFlags,
}

impl FlagFailVerifier {
    pub fn accept_all() -> Self {
        FlagFailVerifier {
            fail_flags: VerifyFlags::empty(),
        }
    }

    pub fn fail_on(fail_flags: VerifyFlags) -> Self {
        FlagFailVerifier { fail_flags }
    }
}

impl ScriptVerifier for FlagFailVerifier {
    fn verify_input(
        &self,
        _tx: &IndexedTransaction,
        index: usize,
        _coin: &Coin,
        flags: VerifyFlags,
    ) -> Result<(), ScriptError> {
        if !self.fail_flags.is_empty() && flags.intersects(self.fail_flags) {
            return Err(ScriptError {
                input: index,
                reason: "test-flag-failure".to_string(),
            });
        }
        Ok(())
    }
}

/// A fee estimator that answers with a fixed rate and remembers what it was
/// fed, for assertions.
#[derive(Default)]
pub struct FlatFeeEstimator {
    pub rate: u64,
    pub seen_txs: Vec<H256>,
    pub seen_blocks: Vec<u32>,
    pub removed: Vec<H256>,
}

impl FlatFeeEstimator {
    pub fn new(rate: u64) -> Self {
        FlatFeeEstimator {
            rate,
            ..Default::default()
        }
    }
}

impl FeeEstimator for FlatFeeEstimator {
    fn estimate_fee(&self, _target: u32, _smart: bool) -> u64 {
        self.rate
    }

    fn estimate_priority(&self, _target: u32, _smart: bool) -> f64 {
        0.0
    }

    fn process_tx(&mut self, txid: &H256, _height: u32, _fee: u64, _vsize: u64) {
        self.seen_txs.push(*txid);
    }

    fn process_block(&mut self, height: u32, _confirmed: &[H256], _is_synced: bool) {
        self.seen_blocks.push(height);
    }

    fn remove_tx(&mut self, txid: &H256) {
        self.removed.push(*txid);
    }

    fn reset(&mut self) {
        self.seen_txs.clear();
        self.seen_blocks.clear();
        self.removed.clear();
    }

    fn to_raw(&self) -> Vec<u8> {
        self.rate.to_le_bytes().to_vec()
    }

    fn inject(&mut self, raw: &[u8]) -> bool {
        if raw.len() != 8 {
            return false;
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        self.rate = u64::from_le_bytes(buf);
        true
    }
}

/// Build a signed-looking transaction spending the given outpoints into
/// `outputs` many equal P2PKH outputs totalling `total_out`.
pub fn spend(points: &[OutPoint], total_out: u64, outputs: usize) -> IndexedTransaction {
    let share = total_out / outputs as u64;
    Transaction {
        version: 1,
        inputs: points
            .iter()
            .map(|point| {
                TxInput::new(*point, Script::pushes(&[&[0x51]]), SEQUENCE_FINAL)
            })
            .collect(),
        outputs: (0..outputs)
            .map(|i| TxOutput::new(share, Script::p2pkh(&[i as u8 + 1; 20])))
            .collect(),
        locktime: 0,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fund_and_spend() {
        let chain = MockChain::new();
        let point = chain.fund(100_000, Script::p2pkh(&[9u8; 20]));
        assert!(chain.get_coins(&point.txid).is_some());

        let tx = spend(&[point], 90_000, 1);
        assert_eq!(tx.inputs[0].prev_out, point);
    }

    #[test]
    fn add_block_advances_tip() {
        let chain = MockChain::new();
        let prev = chain.tip_hash();

        let cb: IndexedTransaction = Transaction {
            version: 1,
            inputs: vec![TxInput::new(OutPoint::null(), Script::pushes(&[&[1]]), 0)],
            outputs: vec![TxOutput::new(50, Script::p2pkh(&[1u8; 20]))],
            locktime: 0,
        }
        .into();
        let mut header = Header::default();
        header.prev_block = prev;
        header.merkle_root = ember_hash::merkle_root(&[cb.txid()]);
        let block = Block::new(header, vec![cb]);

        let base = chain.tip_height();
        chain.add_block(block.clone()).unwrap();
        assert_eq!(chain.tip_hash(), block.hash());
        assert_eq!(chain.tip_height(), base + 1);

        // A block not extending the tip is refused.
        let err = chain.add_block(block).unwrap_err();
        assert_eq!(err, ChainError::BadPrevBlock);
    }
}
