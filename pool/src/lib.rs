//! The transaction memory pool.
//!
//! Admission runs the full contextual validation ladder; admitted entries
//! form a DAG with ancestor/descendant fee accounting, feed the block
//! template builder, and are mirrored to a versioned persistent cache.
//! Orphans wait on their missing parents and re-enter validation when the
//! parents arrive.

mod cache;
mod config;
mod entry;
mod error;
mod orphan;
mod pool;
mod rejects;
mod validator;

pub use cache::{PersistentCache, CACHE_VERSION};
pub use config::PoolConfig;
pub use entry::{EvictKey, MempoolEntry};
pub use error::{RejectCategory, VerifyError};
pub use orphan::{Orphan, OrphanPool};
pub use pool::{MempoolInfo, TransactionPool, TxMeta};
pub use rejects::RejectFilter;
pub use validator::FREE_THRESHOLD;
