//! Shared lock types.
//!
//! All crates in the workspace take their locks from here so that the
//! locking discipline (and any future instrumentation) lives in one place.

pub use parking_lot::{
    Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockUpgradableReadGuard,
    RwLockWriteGuard,
};
