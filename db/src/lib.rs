//! The `KeyValueDB` trait and its in-memory backend.
//!
//! Persistent state in the node goes through this interface: an ordered
//! keyspace, point reads, and atomic batched writes. Production deployments
//! plug a disk-backed engine in from outside; the engine itself is an
//! external collaborator.

mod batch;
mod memorydb;

pub use batch::{Batch, Operation};
pub use memorydb::MemoryKeyValueDB;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum Error {
    #[error("db error: {0}")]
    DBError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub trait KeyValueDB: Sync + Send {
    /// Apply a batch atomically.
    fn write(&self, batch: Batch) -> Result<()>;

    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Visit every `(key, value)` with the given key prefix, in key order.
    fn traverse(
        &self,
        prefix: &[u8],
        callback: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()>;

    /// Delete every key with the given prefix.
    fn delete_prefix(&self, prefix: &[u8]) -> Result<()>;
}
