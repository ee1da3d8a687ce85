//! Assembles the enabled RPC modules into one `IoHandler`.
//!
//! The HTTP/JSON dispatcher that actually serves the handler lives
//! outside the core; anything able to feed request strings to an
//! `IoHandler` works.

use crate::module::{ChainRpc, ChainRpcImpl, MinerRpc, MinerRpcImpl, PoolRpc, PoolRpcImpl};
use ember_miner::{BlockAssemblerController, WorkEngine};
use ember_pool::TransactionPool;
use ember_traits::ChainProvider;
use jsonrpc_core::IoHandler;
use std::sync::Arc;

pub struct ServiceBuilder {
    io: IoHandler,
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceBuilder {
    pub fn new() -> Self {
        ServiceBuilder {
            io: IoHandler::new(),
        }
    }

    pub fn enable_chain<C: ChainProvider + 'static>(mut self, chain: Arc<C>) -> Self {
        self.io.extend_with(ChainRpcImpl { chain }.to_delegate());
        self
    }

    pub fn enable_pool<C: ChainProvider + 'static>(
        mut self,
        pool: Arc<TransactionPool<C>>,
    ) -> Self {
        self.io.extend_with(PoolRpcImpl { pool }.to_delegate());
        self
    }

    pub fn enable_miner<C: ChainProvider + 'static>(
        mut self,
        chain: Arc<C>,
        pool: Arc<TransactionPool<C>>,
        assembler: BlockAssemblerController,
        engine: Arc<WorkEngine<C>>,
    ) -> Self {
        self.io.extend_with(
            MinerRpcImpl {
                chain,
                pool,
                assembler,
                engine,
            }
            .to_delegate(),
        );
        self
    }

    pub fn build(self) -> IoHandler {
        self.io
    }
}
