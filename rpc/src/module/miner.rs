use crate::error::RPCError;
use crate::types::{
    compact_to_difficulty, optional_object, parse_hex, TemplateJson, TemplateRequest,
    TemplateTxJson, WorkJson,
};
use ember_core::block::Block;
use ember_core::{MAX_BLOCK_SIGOPS_COST, MAX_BLOCK_WEIGHT, WITNESS_SCALE_FACTOR};
use ember_miner::{BlockAssemblerController, BlockTemplate, DeploymentInfo, MinerError, WorkEngine};
use ember_pool::TransactionPool;
use ember_traits::ChainProvider;
use jsonrpc_core::{Result, Value};
use jsonrpc_derive::rpc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// How long a longpoll is allowed to hang before answering with the
/// current state anyway.
const LONGPOLL_TIMEOUT: Duration = Duration::from_secs(60);

#[rpc(server)]
pub trait MinerRpc {
    #[rpc(name = "getblocktemplate")]
    fn get_block_template(&self, request: Option<Value>) -> Result<TemplateJson>;

    #[rpc(name = "submitblock")]
    fn submit_block(&self, hex: String, dummy: Option<Value>) -> Result<Value>;

    #[rpc(name = "getwork")]
    fn get_work(&self, data: Option<String>) -> Result<Value>;

    #[rpc(name = "getworklp")]
    fn get_work_lp(&self, data: Option<String>) -> Result<Value>;

    #[rpc(name = "getmininginfo")]
    fn get_mining_info(&self) -> Result<Value>;

    #[rpc(name = "getnetworkhashps")]
    fn get_network_hash_ps(&self, blocks: Option<u32>, height: Option<u32>) -> Result<f64>;
}

pub struct MinerRpcImpl<C: ChainProvider> {
    pub chain: Arc<C>,
    pub pool: Arc<TransactionPool<C>>,
    pub assembler: BlockAssemblerController,
    pub engine: Arc<WorkEngine<C>>,
}

fn miner_error(err: MinerError) -> jsonrpc_core::Error {
    match err {
        MinerError::UnsupportedRule(rule) => {
            RPCError::invalid_parameter(format!("Support for '{rule}' rule requires explicit client support"))
        }
        MinerError::BadData(message) => RPCError::invalid_parameter(message),
        MinerError::Chain(_) | MinerError::ServiceStopped | MinerError::NoAttempt => {
            RPCError::internal()
        }
    }
}

impl<C: ChainProvider + 'static> MinerRpcImpl<C> {
    fn template_json(&self, template: &BlockTemplate, info: &DeploymentInfo) -> TemplateJson {
        let transactions = template
            .items
            .iter()
            .map(|item| TemplateTxJson {
                data: hex::encode(item.tx.transaction.encode(true)),
                txid: item.tx.txid().to_rev_hex(),
                hash: item.tx.wtxid().to_rev_hex(),
                depends: item.depends.clone(),
                fee: item.fee,
                sigops: item.sigops,
                weight: item.weight,
            })
            .collect();

        let mut coinbaseaux = std::collections::BTreeMap::new();
        coinbaseaux.insert(
            "flags".to_string(),
            hex::encode(&template.coinbase_flags),
        );

        // The template always carries coinbasevalue; coinbasetxn stays
        // disabled even for clients that ask, since the engine owns the
        // extranonce layout of the coinbase it builds.
        TemplateJson {
            capabilities: vec!["proposal".to_string()],
            version: template.version,
            rules: info.rules.clone(),
            vbavailable: info.vb_available.iter().cloned().collect(),
            vbrequired: 0,
            previousblockhash: template.prev_block.to_rev_hex(),
            transactions,
            coinbaseaux,
            coinbasevalue: template.reward(),
            longpollid: template.longpoll_id(),
            target: hex::encode(template.target),
            mintime: u64::from(template.min_time()),
            // Two hours of forward drift, the consensus bound.
            maxtime: u64::from(template.time) + 2 * 60 * 60,
            mutable: vec![
                "time".to_string(),
                "transactions".to_string(),
                "prevblock".to_string(),
            ],
            noncerange: "00000000ffffffff".to_string(),
            sigoplimit: MAX_BLOCK_SIGOPS_COST,
            sizelimit: MAX_BLOCK_WEIGHT / WITNESS_SCALE_FACTOR,
            weightlimit: MAX_BLOCK_WEIGHT,
            curtime: u64::from(template.time),
            bits: format!("{:08x}", template.bits),
            height: template.height,
            default_witness_commitment: if template.witness {
                Some(hex::encode(
                    ember_core::script::Script::commitment(&template.witness_commitment()).0,
                ))
            } else {
                None
            },
        }
    }
}

impl<C: ChainProvider + 'static> MinerRpc for MinerRpcImpl<C> {
    fn get_block_template(&self, request: Option<Value>) -> Result<TemplateJson> {
        let request: TemplateRequest = optional_object(request)
            .ok_or_else(|| RPCError::custom(RPCError::TypeError, "Invalid template request"))?;

        match request.mode.as_deref() {
            None | Some("template") => {}
            Some(other) => {
                return Err(RPCError::invalid_parameter(format!(
                    "Invalid mode: {other}"
                )))
            }
        }

        if let Some(lpid) = &request.longpollid {
            if let Some(waiter) = self.engine.handle_longpoll(lpid).map_err(miner_error)? {
                // Hang until the tip or the mempool invalidates the
                // caller's template, or the timeout passes.
                let _ = waiter.recv_timeout(LONGPOLL_TIMEOUT);
            }
        }

        let (template, info) = self
            .assembler
            .create_template(request.rules.clone())
            .map_err(miner_error)?;
        Ok(self.template_json(&template, &info))
    }

    fn submit_block(&self, hex: String, _dummy: Option<Value>) -> Result<Value> {
        let raw = hex::decode(&hex)
            .map_err(|_| RPCError::deserialization("Block decode failed"))?;
        let block = Block::from_bytes(&raw)
            .map_err(|_| RPCError::deserialization("Block decode failed"))?;

        match self.engine.add_block(block).map_err(miner_error)? {
            None => Ok(Value::Null),
            Some(reason) => Ok(Value::String(reason)),
        }
    }

    fn get_work(&self, data: Option<String>) -> Result<Value> {
        match data {
            Some(data) => {
                let raw = parse_hex(&data)
                    .ok_or_else(|| RPCError::invalid_parameter("Invalid work data"))?;
                let accepted = self.engine.submit_work(&raw).map_err(miner_error)?;
                Ok(Value::Bool(accepted))
            }
            None => {
                let unit = self.engine.create_work().map_err(miner_error)?;
                Ok(json!(WorkJson {
                    data: unit.data_hex(),
                    target: unit.target_hex(),
                    height: unit.height,
                }))
            }
        }
    }

    /// The long-polling variant of `getwork`; the dispatcher routes
    /// requests here when the `longpoll` query flag is set.
    fn get_work_lp(&self, data: Option<String>) -> Result<Value> {
        if data.is_some() {
            return self.get_work(data);
        }
        let waiter = self.engine.longpoll();
        let _ = waiter.recv_timeout(LONGPOLL_TIMEOUT);
        self.get_work(None)
    }

    fn get_mining_info(&self) -> Result<Value> {
        let bits = self.chain.next_bits();
        let info = self.pool.info();
        Ok(json!({
            "blocks": self.chain.tip_height(),
            "currentblockweight": 0,
            "currentblocktx": 0,
            "difficulty": compact_to_difficulty(bits),
            "networkhashps": self.get_network_hash_ps(None, None)?,
            "pooledtx": info.total_tx,
            "chain": "main",
        }))
    }

    fn get_network_hash_ps(&self, _blocks: Option<u32>, _height: Option<u32>) -> Result<f64> {
        // Estimated from the current difficulty at the target block pace.
        let difficulty = compact_to_difficulty(self.chain.next_bits());
        Ok(difficulty * 2f64.powi(32) / 600.0)
    }
}
