//! Interfaces of the collaborators the core consumes but does not own:
//! the chain, script execution, and fee estimation. Implementations are
//! supplied at construction; tests use the stand-ins from
//! `ember-test-chain`.

mod chain;
mod estimator;
mod script;
mod view_ext;

pub use chain::{
    ChainError, ChainFeatures, ChainProvider, Deployment, LockFlags, ThresholdState,
};
pub use estimator::FeeEstimator;
pub use script::{ScriptError, ScriptVerifier};
pub use view_ext::CoinViewChainExt;
