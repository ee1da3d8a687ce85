use ember_core::coins::Coin;
use ember_core::script::VerifyFlags;
use ember_core::transaction::IndexedTransaction;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("script failure on input {input}: {reason}")]
pub struct ScriptError {
    pub input: usize,
    pub reason: String,
}

/// Script execution and signature checking, supplied by the embedding node.
/// Flag handling must honour `VerifyFlags` exactly: the validator retries
/// failed verifications with relaxed flag sets to classify malleation.
pub trait ScriptVerifier: Send + Sync {
    fn verify_input(
        &self,
        tx: &IndexedTransaction,
        index: usize,
        coin: &Coin,
        flags: VerifyFlags,
    ) -> Result<(), ScriptError>;
}
