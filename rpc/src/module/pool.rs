use crate::error::RPCError;
use crate::types::{to_btc, MempoolEntryJson, MempoolInfoJson};
use ember_core::transaction::{IndexedTransaction, Transaction};
use ember_hash::H256;
use ember_pool::TransactionPool;
use ember_traits::ChainProvider;
use jsonrpc_core::Result;
use jsonrpc_derive::rpc;
use log::debug;
use serde_json::{json, Value};
use std::sync::Arc;

#[rpc(server)]
pub trait PoolRpc {
    #[rpc(name = "sendrawtransaction")]
    fn send_raw_transaction(&self, hex: String) -> Result<String>;

    #[rpc(name = "getrawmempool")]
    fn get_raw_mempool(&self, verbose: Option<bool>) -> Result<Value>;

    #[rpc(name = "getmempoolinfo")]
    fn get_mempool_info(&self) -> Result<MempoolInfoJson>;

    #[rpc(name = "getmempoolentry")]
    fn get_mempool_entry(&self, txid: String) -> Result<MempoolEntryJson>;

    #[rpc(name = "getmempoolancestors")]
    fn get_mempool_ancestors(&self, txid: String) -> Result<Vec<String>>;

    #[rpc(name = "getmempooldescendants")]
    fn get_mempool_descendants(&self, txid: String) -> Result<Vec<String>>;

    #[rpc(name = "prioritisetransaction")]
    fn prioritise_transaction(
        &self,
        txid: String,
        priority_delta: f64,
        fee_delta: i64,
    ) -> Result<bool>;
}

pub struct PoolRpcImpl<C: ChainProvider> {
    pub pool: Arc<TransactionPool<C>>,
}

fn parse_txid(txid: &str) -> Result<H256> {
    H256::from_rev_hex(txid)
        .ok_or_else(|| RPCError::custom(RPCError::TypeError, "Invalid txid"))
}

impl<C: ChainProvider + 'static> PoolRpcImpl<C> {
    fn entry_json(&self, txid: &H256) -> Result<MempoolEntryJson> {
        let entry = self
            .pool
            .get_entry(txid)
            .ok_or_else(|| {
                RPCError::custom(RPCError::InvalidAddressOrKey, "Transaction not in mempool")
            })?;
        Ok(MempoolEntryJson {
            vsize: entry.size,
            weight: entry.tx().weight(),
            fee: to_btc(entry.fee),
            modifiedfee: to_btc(entry.delta_fee.max(0) as u64),
            time: entry.time,
            height: entry.height,
            descendantcount: self.pool.count_descendants_of(txid) + 1,
            descendantsize: entry.desc_size,
            descendantfees: entry.desc_fee,
            ancestorcount: self.pool.count_ancestors_of(txid) + 1,
            wtxid: entry.wtxid().to_rev_hex(),
            depends: entry
                .depends
                .iter()
                .map(|dep| dep.to_rev_hex())
                .collect(),
        })
    }
}

impl<C: ChainProvider + 'static> PoolRpc for PoolRpcImpl<C> {
    fn send_raw_transaction(&self, hex: String) -> Result<String> {
        let raw = hex::decode(&hex)
            .map_err(|_| RPCError::deserialization("TX decode failed"))?;
        let tx: IndexedTransaction = Transaction::from_bytes(&raw)
            .map_err(|_| RPCError::deserialization("TX decode failed"))?
            .into();
        let txid = tx.txid();

        match self.pool.add_tx(tx, 0) {
            Ok(None) => Ok(txid.to_rev_hex()),
            Ok(Some(missing)) => {
                debug!(target: "rpc", "tx {txid} orphaned on {} parents", missing.len());
                Err(RPCError::custom(
                    RPCError::VerifyRejected,
                    "missing-inputs",
                ))
            }
            Err(err) => Err(RPCError::from_verify_error(&err)),
        }
    }

    fn get_raw_mempool(&self, verbose: Option<bool>) -> Result<Value> {
        if verbose.unwrap_or(false) {
            let mut map = serde_json::Map::new();
            for txid in self.pool.get_snapshot() {
                map.insert(txid.to_rev_hex(), json!(self.entry_json(&txid)?));
            }
            Ok(Value::Object(map))
        } else {
            let ids: Vec<String> = self
                .pool
                .get_snapshot()
                .into_iter()
                .map(|txid| txid.to_rev_hex())
                .collect();
            Ok(json!(ids))
        }
    }

    fn get_mempool_info(&self) -> Result<MempoolInfoJson> {
        let info = self.pool.info();
        Ok(MempoolInfoJson {
            size: info.total_tx,
            orphans: info.total_orphans,
            bytes: info.bytes,
            usage: info.usage,
            maxmempool: info.max_size,
            mempoolminfee: to_btc(info.min_relay),
            minrelaytxfee: to_btc(info.min_relay),
        })
    }

    fn get_mempool_entry(&self, txid: String) -> Result<MempoolEntryJson> {
        self.entry_json(&parse_txid(&txid)?)
    }

    fn get_mempool_ancestors(&self, txid: String) -> Result<Vec<String>> {
        let txid = parse_txid(&txid)?;
        if !self.pool.has_entry(&txid) {
            return Err(RPCError::custom(
                RPCError::InvalidAddressOrKey,
                "Transaction not in mempool",
            ));
        }
        Ok(self
            .pool
            .get_ancestors(&txid)
            .into_iter()
            .map(|id| id.to_rev_hex())
            .collect())
    }

    fn get_mempool_descendants(&self, txid: String) -> Result<Vec<String>> {
        let txid = parse_txid(&txid)?;
        if !self.pool.has_entry(&txid) {
            return Err(RPCError::custom(
                RPCError::InvalidAddressOrKey,
                "Transaction not in mempool",
            ));
        }
        Ok(self
            .pool
            .get_descendants(&txid)
            .into_iter()
            .map(|id| id.to_rev_hex())
            .collect())
    }

    fn prioritise_transaction(
        &self,
        txid: String,
        priority_delta: f64,
        fee_delta: i64,
    ) -> Result<bool> {
        let txid = parse_txid(&txid)?;
        if !self.pool.prioritise(&txid, priority_delta, fee_delta) {
            return Err(RPCError::custom(
                RPCError::InvalidAddressOrKey,
                "Transaction not in mempool",
            ));
        }
        Ok(true)
    }
}
