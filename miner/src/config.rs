use ember_core::script::Script;
use serde::{Deserialize, Serialize};

/// Miner configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MinerConfig {
    /// Arbitrary bytes stamped into the coinbase input script.
    pub coinbase_flags: String,
    /// Raw payout script for the coinbase output.
    pub payout_script: Vec<u8>,
    /// Weight budget for assembled blocks.
    pub max_weight: u64,
    /// Sigop budget for assembled blocks.
    pub max_sigops: u64,
    /// Build witness-committing blocks when the chain allows it.
    pub witness: bool,
}

impl Default for MinerConfig {
    fn default() -> Self {
        MinerConfig {
            coinbase_flags: "mined by ember".to_string(),
            payout_script: Script::p2pkh(&[0u8; 20]).0,
            max_weight: ember_core::MAX_BLOCK_WEIGHT,
            max_sigops: ember_core::MAX_BLOCK_SIGOPS_COST,
            witness: true,
        }
    }
}

impl MinerConfig {
    pub fn payout(&self) -> Script {
        Script::new(self.payout_script.clone())
    }
}
