use crate::ChainProvider;
use ember_core::coins::CoinView;
use ember_core::transaction::Transaction;
use ember_hash::H256;

/// Chain-backed operations on a `CoinView`.
pub trait CoinViewChainExt {
    /// Pull a txid's coins from the chain into the view. `true` when the
    /// chain knew the txid.
    fn read_coins<C: ChainProvider + ?Sized>(&mut self, chain: &C, txid: &H256) -> bool;

    /// Make sure every input's coins record is loaded. Returns the txids
    /// the chain does not know, i.e. the caller's missing parents.
    fn ensure_inputs<C: ChainProvider + ?Sized>(&mut self, chain: &C, tx: &Transaction)
        -> Vec<H256>;

    /// Load and spend all inputs, recording undo entries. `false` if any
    /// input was unknown or already spent; the view is left untouched in
    /// that case.
    fn spend_inputs<C: ChainProvider + ?Sized>(&mut self, chain: &C, tx: &Transaction) -> bool;
}

impl CoinViewChainExt for CoinView {
    fn read_coins<C: ChainProvider + ?Sized>(&mut self, chain: &C, txid: &H256) -> bool {
        if self.get_coins(txid).is_some() {
            return true;
        }
        match chain.get_coins(txid) {
            Some(coins) => {
                self.add(*txid, coins);
                true
            }
            None => false,
        }
    }

    fn ensure_inputs<C: ChainProvider + ?Sized>(
        &mut self,
        chain: &C,
        tx: &Transaction,
    ) -> Vec<H256> {
        let mut missing = Vec::new();
        for input in &tx.inputs {
            let txid = input.prev_out.txid;
            if !self.read_coins(chain, &txid) && !missing.contains(&txid) {
                missing.push(txid);
            }
        }
        missing
    }

    fn spend_inputs<C: ChainProvider + ?Sized>(&mut self, chain: &C, tx: &Transaction) -> bool {
        if !self.ensure_inputs(chain, tx).is_empty() {
            return false;
        }
        let undo_mark = self.undo_log().len();
        for input in &tx.inputs {
            if self.spend_output(&input.prev_out).is_none() {
                // Roll back the partial spend.
                while self.undo_log().len() > undo_mark {
                    self.revert_one();
                }
                return false;
            }
        }
        true
    }
}
