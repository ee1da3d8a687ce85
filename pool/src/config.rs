use serde::{Deserialize, Serialize};

/// Transaction pool configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Memory budget in bytes.
    pub max_size: u64,
    /// Orphan pool entry cap.
    pub max_orphans: usize,
    /// Unconfirmed ancestor chain cap.
    pub max_ancestors: usize,
    /// Seconds before an idle parent-free entry may be expired.
    pub expiry_time: u64,
    /// Minimum relay fee rate, satoshis per kvB.
    pub min_relay: u64,
    /// Rate-limit free transactions.
    pub limit_free: bool,
    /// Kilobytes of free transactions allowed per ten minutes.
    pub limit_free_relay: u64,
    /// Let high-priority transactions skip the fee floor.
    pub relay_priority: bool,
    /// Apply the standardness policy.
    pub require_standard: bool,
    /// Reject fees above 10000x the floor.
    pub reject_absurd_fees: bool,
    /// Accept transactions signalling BIP125 replacement.
    pub replace_by_fee: bool,
    /// Accept witness transactions before the chain activates segwit.
    pub premature_witness: bool,
    /// Re-verify admitted scripts with mandatory-only flags.
    pub paranoid: bool,
    /// Maintain the per-address coin and transaction indexes.
    pub index_address: bool,
    /// Mirror the pool to the persistent cache.
    pub persistent: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_size: 100_000_000,
            max_orphans: 100,
            max_ancestors: 25,
            expiry_time: 72 * 60 * 60,
            min_relay: 1000,
            limit_free: true,
            limit_free_relay: 15,
            relay_priority: true,
            require_standard: true,
            reject_absurd_fees: true,
            replace_by_fee: false,
            premature_witness: false,
            paranoid: false,
            index_address: false,
            persistent: false,
        }
    }
}

impl PoolConfig {
    /// The fee floor for a transaction of `size` virtual bytes.
    pub fn min_fee(&self, size: u64) -> u64 {
        self.min_relay * size / 1000
    }
}
