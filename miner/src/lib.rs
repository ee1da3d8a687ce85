//! Block template construction, the getwork/longpoll engine, and the CPU
//! miner that drives them in-process.

mod block_assembler;
mod block_template;
mod config;
mod error;
mod miner;
mod work_engine;
pub mod worker;

pub use block_assembler::{BlockAssembler, BlockAssemblerController, DeploymentInfo};
pub use block_template::{BlockTemplate, Nonces, TemplateEntry};
pub use config::MinerConfig;
pub use error::MinerError;
pub use miner::{CpuMiner, MinerState, NONCE_INTERVAL};
pub use work_engine::{pad_work_data, swap_work_words, WorkEngine, WorkUnit, WORK_DATA_SIZE};
