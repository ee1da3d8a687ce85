//! Contextual transaction verification for mempool admission.
//!
//! The pool drives the full admission sequence; the checks that do not
//! need pool state live here. Every failure is a typed `VerifyError`
//! that callers match on; nothing unwinds.

use crate::config::PoolConfig;
use crate::error::{RejectCategory, VerifyError};
use ember_core::coins::CoinView;
use ember_core::script::{ScriptClass, VerifyFlags, MAX_NULL_DATA_SIZE, MAX_SCRIPT_SIG_SIZE};
use ember_core::transaction::IndexedTransaction;
use ember_core::{COINBASE_MATURITY, MAX_MONEY, MAX_TX_WEIGHT};
use ember_traits::{ChainFeatures, ScriptVerifier};
use log::error;
use rustc_hash::FxHashSet;

/// Priority at which a transaction rides for free: one coin aged one day,
/// in a 250-byte transaction.
pub const FREE_THRESHOLD: f64 = 100_000_000.0 * 144.0 / 250.0;

/// Redeem scripts above this sigop count are nonstandard.
const MAX_P2SH_SIGOPS: u32 = 15;

/// Bare multisig outputs above this key count are nonstandard.
const MAX_BARE_MULTISIG_KEYS: u8 = 3;

/// Structural sanity, independent of any context.
pub fn check_sanity(tx: &IndexedTransaction) -> Result<(), VerifyError> {
    if tx.inputs.is_empty() {
        return Err(VerifyError::invalid("bad-txns-vin-empty", 100));
    }
    if tx.outputs.is_empty() {
        return Err(VerifyError::invalid("bad-txns-vout-empty", 100));
    }
    if tx.weight() > ember_core::MAX_BLOCK_WEIGHT {
        return Err(VerifyError::invalid("bad-txns-oversize", 100));
    }

    let mut total: u64 = 0;
    for output in &tx.outputs {
        if output.value > MAX_MONEY {
            return Err(VerifyError::invalid("bad-txns-vout-toolarge", 100));
        }
        total = match total.checked_add(output.value) {
            Some(total) if total <= MAX_MONEY => total,
            _ => return Err(VerifyError::invalid("bad-txns-txouttotal-toolarge", 100)),
        };
    }

    let mut seen = FxHashSet::default();
    for input in &tx.inputs {
        if !seen.insert(input.prev_out) {
            return Err(VerifyError::invalid("bad-txns-inputs-duplicate", 100));
        }
    }

    if !tx.is_coinbase() {
        for input in &tx.inputs {
            if input.prev_out.is_null() {
                return Err(VerifyError::invalid("bad-txns-prevout-null", 100));
            }
        }
    }

    Ok(())
}

/// The standardness policy for the transaction itself.
pub fn check_standard(
    tx: &IndexedTransaction,
    features: ChainFeatures,
    config: &PoolConfig,
) -> Result<(), VerifyError> {
    // Version 2 semantics arrive with CSV.
    let max_version = if features.has_csv() { 2 } else { 1 };
    if tx.version < 1 || tx.version > max_version {
        return Err(VerifyError::nonstandard("version", 0));
    }

    if tx.weight() > MAX_TX_WEIGHT {
        return Err(VerifyError::nonstandard("tx-size", 0));
    }

    for input in &tx.inputs {
        if input.script.len() > MAX_SCRIPT_SIG_SIZE {
            return Err(VerifyError::nonstandard("scriptsig-size", 0));
        }
        if !input.script.is_push_only() {
            return Err(VerifyError::nonstandard("scriptsig-not-pushonly", 0));
        }
    }

    let mut null_data = 0;
    for output in &tx.outputs {
        match output.script.classify() {
            ScriptClass::NonStandard | ScriptClass::WitnessUnknown => {
                return Err(VerifyError::nonstandard("scriptpubkey", 0));
            }
            ScriptClass::NullData => {
                if output.script.len() > MAX_NULL_DATA_SIZE {
                    return Err(VerifyError::nonstandard("scriptpubkey", 0));
                }
                null_data += 1;
            }
            ScriptClass::Multisig { n, .. } => {
                if n > MAX_BARE_MULTISIG_KEYS {
                    return Err(VerifyError::nonstandard("bare-multisig", 0));
                }
            }
            _ => {}
        }
        if output.is_dust(config.min_relay) {
            return Err(VerifyError::nonstandard("dust", 0));
        }
    }
    if null_data > 1 {
        return Err(VerifyError::nonstandard("multi-op-return", 0));
    }

    if !config.replace_by_fee && tx.is_rbf() {
        return Err(VerifyError::nonstandard("replace-by-fee", 0));
    }

    Ok(())
}

/// Standardness of the coins being spent: redeem script budgets and known
/// previous-output templates.
pub fn check_standard_inputs(
    tx: &IndexedTransaction,
    view: &CoinView,
) -> Result<(), VerifyError> {
    for input in &tx.inputs {
        let coin = match view.get_output(&input.prev_out) {
            Some(coin) => coin,
            None => continue,
        };
        match coin.script.classify() {
            ScriptClass::NonStandard => {
                return Err(VerifyError::nonstandard("bad-txns-nonstandard-inputs", 0));
            }
            ScriptClass::ScriptHash => {
                let redeem = match input.script.last_push() {
                    Some(redeem) => ember_core::script::Script::new(redeem),
                    None => {
                        return Err(VerifyError::nonstandard(
                            "bad-txns-nonstandard-inputs",
                            0,
                        ));
                    }
                };
                if redeem.sigops(true) > MAX_P2SH_SIGOPS {
                    return Err(VerifyError::nonstandard("bad-txns-nonstandard-inputs", 0));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Input value rules: sums in range, coinbase maturity, fee.
pub fn check_inputs(
    tx: &IndexedTransaction,
    view: &CoinView,
    spend_height: u32,
) -> Result<u64, VerifyError> {
    let mut input_value: u64 = 0;
    for input in &tx.inputs {
        let coin = view
            .get_output(&input.prev_out)
            .ok_or_else(|| VerifyError::new(
                RejectCategory::Duplicate,
                "bad-txns-inputs-missingorspent",
                0,
            ))?;

        if coin.coinbase && spend_height.saturating_sub(coin.height) < COINBASE_MATURITY {
            return Err(VerifyError::invalid("bad-txns-premature-spend-of-coinbase", 0));
        }

        if coin.value > MAX_MONEY {
            return Err(VerifyError::invalid("bad-txns-inputvalues-outofrange", 100));
        }
        input_value = match input_value.checked_add(coin.value) {
            Some(total) if total <= MAX_MONEY => total,
            _ => {
                return Err(VerifyError::invalid("bad-txns-inputvalues-outofrange", 100));
            }
        };
    }

    let output_value = tx
        .output_value()
        .ok_or_else(|| VerifyError::invalid("bad-txns-txouttotal-toolarge", 100))?;
    if input_value < output_value {
        return Err(VerifyError::invalid("bad-txns-in-belowout", 100));
    }
    Ok(input_value - output_value)
}

/// Run script verification over every input. On failure, retry with the
/// witness and cleanstack requirements relaxed to decide whether the
/// failure is malleation-caused; malleated failures must not be cached as
/// rejects.
pub fn verify_scripts(
    scripts: &dyn ScriptVerifier,
    tx: &IndexedTransaction,
    view: &CoinView,
    flags: VerifyFlags,
) -> Result<(), VerifyError> {
    let original = match verify_all_inputs(scripts, tx, view, flags) {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };

    let relaxed = flags - (VerifyFlags::WITNESS | VerifyFlags::CLEANSTACK);
    if verify_all_inputs(scripts, tx, view, relaxed).is_ok() {
        return Err(VerifyError::malleated(
            RejectCategory::Nonstandard,
            original.reason.clone(),
            0,
        ));
    }

    let no_cleanstack = flags - VerifyFlags::CLEANSTACK;
    if verify_all_inputs(scripts, tx, view, no_cleanstack).is_ok() {
        return Err(VerifyError::malleated(
            RejectCategory::Nonstandard,
            original.reason.clone(),
            0,
        ));
    }

    Err(VerifyError::invalid(
        format!("mandatory-script-verify-flag-failed ({})", original.reason),
        100,
    ))
}

/// Belt-and-braces re-verification with mandatory-only flags. A failure
/// here after a standard-flag pass is a bug, not a peer problem.
pub fn verify_scripts_paranoid(
    scripts: &dyn ScriptVerifier,
    tx: &IndexedTransaction,
    view: &CoinView,
) {
    if let Err(err) = verify_all_inputs(scripts, tx, view, VerifyFlags::mandatory()) {
        error!(target: "pool",
            "BUG: tx {} passed standard flags but failed mandatory flags: {}",
            tx.txid(), err.reason
        );
        debug_assert!(false, "mandatory flag failure after standard pass");
    }
}

fn verify_all_inputs(
    scripts: &dyn ScriptVerifier,
    tx: &IndexedTransaction,
    view: &CoinView,
    flags: VerifyFlags,
) -> Result<(), VerifyError> {
    for (index, input) in tx.inputs.iter().enumerate() {
        let coin = view.get_output(&input.prev_out).ok_or_else(|| {
            VerifyError::new(RejectCategory::Duplicate, "bad-txns-inputs-missingorspent", 0)
        })?;
        scripts
            .verify_input(tx, index, coin, flags)
            .map_err(|err| VerifyError::nonstandard(err.reason, 0))?;
    }
    Ok(())
}
