//! UTXO set
//!
//! The authoritative mapping from outpoints to unspent outputs. Mutated
//! only by chain connection and disconnection, always from inside the
//! chain lock.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::crypto::Hash;
use crate::validation::{OutPoint, Transaction, TxOut, UnspentTxOut};

/// UTXO set errors
#[derive(Debug, Error)]
pub enum UtxoError {
    #[error("outpoint {txid}:{index} not found in the UTXO set")]
    NotFound { txid: Hash, index: u32 },
}

/// Set of all unspent transaction outputs
#[derive(Debug, Default, Clone)]
pub struct UtxoSet {
    utxos: HashMap<OutPoint, UnspentTxOut>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self {
            utxos: HashMap::new(),
        }
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains_key(outpoint)
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&UnspentTxOut> {
        self.utxos.get(outpoint)
    }

    /// Record a newly confirmed output.
    ///
    /// Overwriting a live entry would mean two accepted spends of one
    /// outpoint, which validation rules out.
    pub fn add(&mut self, txout: &TxOut, txid: Hash, index: u32, is_coinbase: bool, height: u64) {
        let utxo = UnspentTxOut::new(txout, txid, index, is_coinbase, height);
        debug!(outpoint = %txid, index, "adding outpoint to utxo set");
        let prior = self.utxos.insert(utxo.outpoint(), utxo);
        debug_assert!(prior.is_none(), "outpoint overwrite in UTXO set");
    }

    /// Re-insert an output recovered during block disconnection
    pub fn add_existing(&mut self, utxo: UnspentTxOut) {
        debug!(outpoint = %utxo.txid, index = utxo.txout_idx, "restoring outpoint to utxo set");
        self.utxos.insert(utxo.outpoint(), utxo);
    }

    /// Delete a spent output. The caller has already validated the spend,
    /// so the entry must exist.
    pub fn remove(&mut self, outpoint: &OutPoint) -> Result<UnspentTxOut, UtxoError> {
        self.utxos.remove(outpoint).ok_or(UtxoError::NotFound {
            txid: outpoint.txid,
            index: outpoint.index,
        })
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &UnspentTxOut)> {
        self.utxos.iter()
    }

    /// Read-only snapshot for peers and wallets
    pub fn snapshot(&self) -> Vec<(OutPoint, UnspentTxOut)> {
        self.utxos.iter().map(|(k, v)| (*k, v.clone())).collect()
    }
}

/// Resolve an outpoint against a list of sibling transactions.
///
/// Sibling-sourced outputs have no confirmation height yet.
pub fn find_utxo_in_list(outpoint: &OutPoint, txns: &[Transaction]) -> Option<UnspentTxOut> {
    let txn = txns.iter().find(|t| t.id() == outpoint.txid)?;
    let txout = txn.txouts.get(outpoint.index as usize)?;
    Some(UnspentTxOut::new(
        txout,
        outpoint.txid,
        outpoint.index,
        false,
        0,
    ))
}
