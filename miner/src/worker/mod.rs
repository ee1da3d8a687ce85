//! Hash workers for the CPU miner.

mod dummy;
mod sha256_simple;

pub use dummy::Dummy;
pub use sha256_simple::Sha256Simple;

use std::sync::atomic::AtomicBool;

/// A nonce-search capability. The miner drives it in bounded slices so it
/// can poll for cancelation and report progress in between.
pub trait Worker: Send {
    /// Search `[from, to)` for a nonce that brings the header under the
    /// target. The header buffer's nonce field (bytes 76..80) is scratch
    /// space. Implementations should poll `cancel` at a reasonable rhythm.
    fn search(
        &mut self,
        header: &mut [u8; 80],
        target: &[u8; 32],
        from: u32,
        to: u32,
        cancel: &AtomicBool,
    ) -> Option<u32>;
}
