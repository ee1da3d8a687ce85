//! JSON shapes for the RPC surface, wire-compatible with the reference
//! client's dialect.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// `getblocktemplate` request object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateRequest {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub maxversion: Option<u32>,
    #[serde(default)]
    pub longpollid: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateTxJson {
    pub data: String,
    pub txid: String,
    pub hash: String,
    pub depends: Vec<usize>,
    pub fee: u64,
    pub sigops: u64,
    pub weight: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateJson {
    pub capabilities: Vec<String>,
    pub version: i32,
    pub rules: Vec<String>,
    pub vbavailable: BTreeMap<String, u8>,
    pub vbrequired: u32,
    pub previousblockhash: String,
    pub transactions: Vec<TemplateTxJson>,
    pub coinbaseaux: BTreeMap<String, String>,
    pub coinbasevalue: u64,
    pub longpollid: String,
    pub target: String,
    pub mintime: u64,
    pub maxtime: u64,
    pub mutable: Vec<String>,
    pub noncerange: String,
    pub sigoplimit: u64,
    pub sizelimit: u64,
    pub weightlimit: u64,
    pub curtime: u64,
    pub bits: String,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_witness_commitment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MempoolInfoJson {
    pub size: usize,
    pub orphans: usize,
    pub bytes: u64,
    pub usage: u64,
    pub maxmempool: u64,
    pub mempoolminfee: f64,
    pub minrelaytxfee: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MempoolEntryJson {
    pub vsize: u64,
    pub weight: u64,
    pub fee: f64,
    pub modifiedfee: f64,
    pub time: u64,
    pub height: u32,
    pub descendantcount: usize,
    pub descendantsize: u64,
    pub descendantfees: i64,
    pub ancestorcount: usize,
    pub wtxid: String,
    pub depends: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkJson {
    pub data: String,
    pub target: String,
    pub height: u32,
}

/// Satoshis to the BTC-denominated decimal used on the wire.
pub fn to_btc(sats: u64) -> f64 {
    sats as f64 / 100_000_000.0
}

/// Rough difficulty from compact bits, relative to the genesis target.
pub fn compact_to_difficulty(bits: u32) -> f64 {
    let (exp, mant) = (bits >> 24, f64::from(bits & 0x007f_ffff));
    if mant == 0.0 {
        return 0.0;
    }
    let genesis = f64::from(0xffffu16) * 256f64.powi(0x1d - 3);
    let target = mant * 256f64.powi(exp as i32 - 3);
    genesis / target
}

pub fn parse_hex(data: &str) -> Option<Vec<u8>> {
    hex::decode(data).ok()
}

/// Accept either positional JSON or nothing for optional object params.
pub fn optional_object<T: serde::de::DeserializeOwned + Default>(value: Option<Value>) -> Option<T> {
    match value {
        None | Some(Value::Null) => Some(T::default()),
        Some(value) => serde_json::from_value(value).ok(),
    }
}
