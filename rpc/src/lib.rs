//! The JSON-RPC surface: module traits over the pool, chain and miner,
//! wired together by `ServiceBuilder`. Error codes follow the reference
//! client's assignment.

mod error;
mod module;
mod service_builder;
mod types;

pub use error::RPCError;
pub use module::{ChainRpc, MinerRpc, PoolRpc};
pub use service_builder::ServiceBuilder;
pub use types::{
    MempoolEntryJson, MempoolInfoJson, TemplateJson, TemplateRequest, TemplateTxJson, WorkJson,
};
