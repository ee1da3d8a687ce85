use ember_traits::ChainError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MinerError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
    /// A deployment is ACTIVE but the client did not signal support.
    #[error("unsupported deployment rule: {0}")]
    UnsupportedRule(String),
    #[error("block assembler stopped")]
    ServiceStopped,
    #[error("no current work attempt")]
    NoAttempt,
    #[error("bad data: {0}")]
    BadData(String),
}
