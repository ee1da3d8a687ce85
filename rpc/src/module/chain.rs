use crate::error::RPCError;
use ember_hash::H256;
use ember_traits::ChainProvider;
use jsonrpc_core::Result;
use jsonrpc_derive::rpc;
use serde_json::{json, Value};
use std::sync::Arc;

#[rpc(server)]
pub trait ChainRpc {
    #[rpc(name = "getblockcount")]
    fn get_block_count(&self) -> Result<u32>;

    #[rpc(name = "getbestblockhash")]
    fn get_best_block_hash(&self) -> Result<String>;

    #[rpc(name = "getblockhash")]
    fn get_block_hash(&self, height: u32) -> Result<String>;

    #[rpc(name = "getblockheader")]
    fn get_block_header(&self, hash: String, verbose: Option<bool>) -> Result<Value>;
}

pub struct ChainRpcImpl<C> {
    pub chain: Arc<C>,
}

impl<C: ChainProvider + 'static> ChainRpc for ChainRpcImpl<C> {
    fn get_block_count(&self) -> Result<u32> {
        Ok(self.chain.tip_height())
    }

    fn get_best_block_hash(&self) -> Result<String> {
        Ok(self.chain.tip_hash().to_rev_hex())
    }

    fn get_block_hash(&self, height: u32) -> Result<String> {
        self.chain
            .get_block_hash(height)
            .map(|hash| hash.to_rev_hex())
            .ok_or_else(|| RPCError::invalid_parameter("Block height out of range"))
    }

    fn get_block_header(&self, hash: String, verbose: Option<bool>) -> Result<Value> {
        let hash = H256::from_rev_hex(&hash)
            .ok_or_else(|| RPCError::custom(RPCError::InvalidAddressOrKey, "Invalid block hash"))?;
        let header = self
            .chain
            .get_header(&hash)
            .ok_or_else(|| RPCError::custom(RPCError::InvalidAddressOrKey, "Block not found"))?;

        if verbose.unwrap_or(true) {
            Ok(json!({
                "hash": header.hash().to_rev_hex(),
                "version": header.version,
                "previousblockhash": header.prev_block.to_rev_hex(),
                "merkleroot": header.merkle_root.to_rev_hex(),
                "time": header.time,
                "bits": format!("{:08x}", header.bits),
                "nonce": header.nonce,
            }))
        } else {
            Ok(Value::String(hex::encode(header.encode())))
        }
    }
}
