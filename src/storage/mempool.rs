//! Mempool
//!
//! Transactions accepted as valid but not yet mined, plus a side list of
//! orphans waiting on a missing input. Admission validation happens in
//! `ChainState::accept_transaction`; this structure only stores and
//! selects.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::consensus::Block;
use crate::crypto::Hash;
use crate::storage::UtxoSet;
use crate::validation::{OutPoint, Transaction, UnspentTxOut};

/// Set of yet-unmined transactions
#[derive(Debug, Default, Clone)]
pub struct Mempool {
    txns: HashMap<Hash, Transaction>,
    /// Transactions whose inputs reference outputs nobody has seen yet
    orphans: Vec<Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, txid: &Hash) -> bool {
        self.txns.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash) -> Option<&Transaction> {
        self.txns.get(txid)
    }

    pub fn insert(&mut self, txn: Transaction) {
        self.txns.insert(txn.id(), txn);
    }

    /// Drop a transaction once a connected block confirms it
    pub fn remove(&mut self, txid: &Hash) -> Option<Transaction> {
        self.txns.remove(txid)
    }

    /// Return a transaction to pending status during block disconnection
    pub fn restore(&mut self, txn: Transaction) {
        self.txns.insert(txn.id(), txn);
    }

    /// Park a transaction whose input is not yet resolvable
    pub fn park_orphan(&mut self, txn: Transaction) {
        self.orphans.push(txn);
    }

    pub fn orphans(&self) -> &[Transaction] {
        &self.orphans
    }

    pub fn ids(&self) -> Vec<Hash> {
        self.txns.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.txns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txns.is_empty()
    }

    /// Resolve an outpoint against pending transactions.
    ///
    /// Mempool-sourced outputs are never coinbase and carry no height.
    pub fn find_utxo(&self, outpoint: &OutPoint) -> Option<UnspentTxOut> {
        let txout = self.txns.get(&outpoint.txid)?.txouts.get(outpoint.index as usize)?;
        Some(UnspentTxOut::new(
            txout,
            outpoint.txid,
            outpoint.index,
            false,
            0,
        ))
    }

    /// Greedily fold pending transactions into a candidate block.
    ///
    /// A transaction spending another pending transaction is included only
    /// after its parent; a transaction whose parent cannot be found
    /// anywhere is skipped. Stops growing once the serialized block would
    /// exceed `size_limit`.
    pub fn select_for_block(&self, utxo_set: &UtxoSet, block: Block, size_limit: u64) -> Block {
        let mut added: HashSet<Hash> = HashSet::new();
        let mut block = block;

        // Deterministic iteration order
        let mut ids = self.ids();
        ids.sort();

        for txid in ids {
            block = self.try_add_to_block(block, txid, &mut added, utxo_set, size_limit);
        }

        block
    }

    fn try_add_to_block(
        &self,
        block: Block,
        txid: Hash,
        added: &mut HashSet<Hash>,
        utxo_set: &UtxoSet,
        size_limit: u64,
    ) -> Block {
        if added.contains(&txid) {
            return block;
        }

        let txn = match self.txns.get(&txid) {
            Some(txn) => txn,
            None => return block,
        };

        // Inputs not satisfied by the chain must come from the mempool;
        // pull those parents into the block first.
        let mut block = block;
        for txin in &txn.txins {
            let outpoint = match txin.outpoint {
                Some(outpoint) => outpoint,
                // A restored coinbase can sit in the mempool after a
                // disconnect; it is never selectable.
                None => return block,
            };

            if utxo_set.contains(&outpoint) {
                continue;
            }

            match self.find_utxo(&outpoint) {
                Some(parent) => {
                    block = self.try_add_to_block(block, parent.txid, added, utxo_set, size_limit);
                    if !added.contains(&parent.txid) {
                        debug!(txid = %txid, "couldn't add parent transaction, skipping");
                        return block;
                    }
                }
                None => {
                    debug!(txid = %txid, "no utxo found for input, skipping");
                    return block;
                }
            }
        }

        let mut candidate = block.clone();
        candidate.txns.push(txn.clone());

        let size = bincode::serialized_size(&candidate).unwrap_or(u64::MAX);
        if size < size_limit {
            debug!(txid = %txid, "added transaction to candidate block");
            added.insert(txid);
            candidate
        } else {
            block
        }
    }
}
