use ember_hash::H256;

/// Fee estimation, fed by the mempool and block connects. The serialized
/// form is opaque to the caller; the persistent cache stores it verbatim.
pub trait FeeEstimator: Send {
    /// Estimated fee rate (satoshis per kvB) to confirm within `target`
    /// blocks. Zero when no estimate is available.
    fn estimate_fee(&self, target: u32, smart: bool) -> u64;

    fn estimate_priority(&self, target: u32, smart: bool) -> f64;

    /// Record an admitted transaction.
    fn process_tx(&mut self, txid: &H256, height: u32, fee: u64, vsize: u64);

    /// Record a connected block and the confirmed txids.
    fn process_block(&mut self, height: u32, confirmed: &[H256], is_synced: bool);

    fn remove_tx(&mut self, txid: &H256);

    fn reset(&mut self);

    fn to_raw(&self) -> Vec<u8>;

    /// Replace state from a serialized blob; `false` when unparseable.
    fn inject(&mut self, raw: &[u8]) -> bool;
}
