mod chain;
mod miner;
mod pool;

pub use chain::{ChainRpc, ChainRpcImpl};
pub use miner::{MinerRpc, MinerRpcImpl};
pub use pool::{PoolRpc, PoolRpcImpl};
