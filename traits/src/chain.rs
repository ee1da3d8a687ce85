use bitflags::bitflags;
use ember_core::block::Block;
use ember_core::coins::{CoinView, Coins};
use ember_core::header::Header;
use ember_core::transaction::IndexedTransaction;
use ember_hash::H256;
use thiserror::Error;

bitflags! {
    /// Soft-fork features active at the current tip.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChainFeatures: u32 {
        const BIP34 = 1;
        const BIP66 = 1 << 1;
        const CLTV = 1 << 2;
        const CSV = 1 << 3;
        const WITNESS = 1 << 4;
    }
}

impl ChainFeatures {
    pub fn has_csv(&self) -> bool {
        self.contains(ChainFeatures::CSV)
    }

    pub fn has_witness(&self) -> bool {
        self.contains(ChainFeatures::WITNESS)
    }
}

bitflags! {
    /// Flags for locktime and sequence-lock evaluation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LockFlags: u32 {
        const MEDIAN_TIME_PAST = 1;
    }
}

impl LockFlags {
    /// The flags mempool admission verifies against.
    pub fn standard() -> Self {
        LockFlags::MEDIAN_TIME_PAST
    }
}

/// BIP9 deployment signalling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdState {
    Defined,
    Started,
    LockedIn,
    Active,
    Failed,
}

/// A versionbits deployment known to the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub name: &'static str,
    pub bit: u8,
    /// Forced deployments never fail template creation when the client
    /// does not signal support.
    pub force: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The block failed contextual verification.
    #[error("verification failed: {reason}")]
    Verify { reason: String },
    /// The block does not extend a known block.
    #[error("bad-prevblk")]
    BadPrevBlock,
    #[error("chain error: {0}")]
    Internal(String),
}

/// The chain as the mempool and miner see it. Reads are cheap; `add_block`
/// takes the chain's own lock internally.
pub trait ChainProvider: Send + Sync {
    fn tip_hash(&self) -> H256;

    fn tip_height(&self) -> u32;

    fn is_synced(&self) -> bool;

    fn features(&self) -> ChainFeatures;

    /// Median time of the past 11 blocks at the tip.
    fn median_time_past(&self) -> u64;

    /// Network-adjusted unix time in seconds.
    fn now(&self) -> u64;

    fn get_coins(&self, txid: &H256) -> Option<Coins>;

    fn has_coins(&self, txid: &H256) -> bool {
        self.get_coins(txid).is_some()
    }

    fn get_block_hash(&self, height: u32) -> Option<H256>;

    fn get_header(&self, hash: &H256) -> Option<Header>;

    /// Compact target for the next block.
    fn next_bits(&self) -> u32;

    /// Subsidy for a block at the given height.
    fn subsidy(&self, height: u32) -> u64;

    fn deployments(&self) -> Vec<Deployment>;

    fn deployment_state(&self, deployment: &Deployment) -> ThresholdState;

    /// Locktime finality at the next block.
    fn verify_final(&self, tx: &IndexedTransaction, flags: LockFlags) -> bool;

    /// BIP68 relative lock evaluation against the coins being spent.
    fn verify_locks(&self, tx: &IndexedTransaction, view: &CoinView, flags: LockFlags) -> bool;

    /// Connect a block to the chain.
    fn add_block(&self, block: Block) -> Result<(), ChainError>;
}
