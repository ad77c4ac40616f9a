//! Chain state
//!
//! The active chain, its side branches, the UTXO set, and the mempool,
//! mutated together under one lock. All consensus effects flow through
//! `connect_block` and `disconnect_block` so the structures never drift
//! apart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consensus::{validate_block, validate_transaction, Block};
use crate::crypto::Hash;
use crate::params::GET_BLOCKS_CHUNK_SIZE;
use crate::storage::{Mempool, UtxoSet};
use crate::validation::{OutPoint, Transaction, TxIn, UnspentTxOut};

/// Index of the active chain; side branches occupy 1..
pub const ACTIVE_CHAIN_IDX: usize = 0;

/// Sink for newly accepted blocks and transactions.
///
/// Implementations must not block: they run inside the chain lock.
/// Network delivery happens elsewhere.
pub trait Relay: Send {
    fn relay_block(&self, block: &Block);
    fn relay_transaction(&self, txn: &Transaction);
}

/// Chain mutation errors
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("no tip block to disconnect")]
    NotTip,
    #[error("spent output {0:?} could not be recovered from the chain")]
    MissingSpentOutput(OutPoint),
}

/// The node's complete view of the ledger
pub struct ChainState {
    active_chain: Vec<Block>,
    side_branches: Vec<Vec<Block>>,
    orphan_blocks: Vec<Block>,
    utxo: UtxoSet,
    mempool: Mempool,
    mine_interrupt: Arc<AtomicBool>,
    relay: Option<Box<dyn Relay>>,
}

impl ChainState {
    /// Fresh state seeded with the given genesis block.
    ///
    /// The genesis block is applied directly, bypassing validation; it is
    /// trusted by definition.
    pub fn new(genesis: Block) -> Self {
        let mut state = Self::empty();
        let coinbase = &genesis.txns[0];
        let txid = coinbase.id();
        for (idx, txout) in coinbase.txouts.iter().enumerate() {
            state.utxo.add(txout, txid, idx as u32, true, 0);
        }
        state.active_chain.push(genesis);
        state
    }

    /// State with no blocks at all. Only useful together with
    /// `set_active_chain` when tests construct chains by hand.
    pub fn empty() -> Self {
        Self {
            active_chain: Vec::new(),
            side_branches: Vec::new(),
            orphan_blocks: Vec::new(),
            utxo: UtxoSet::new(),
            mempool: Mempool::new(),
            mine_interrupt: Arc::new(AtomicBool::new(false)),
            relay: None,
        }
    }

    /// Replace the active chain without touching the UTXO set or
    /// mempool. A testing seam; production code builds chains through
    /// `connect_block` only.
    pub fn set_active_chain(&mut self, chain: Vec<Block>) {
        self.active_chain = chain;
    }

    pub fn set_relay(&mut self, relay: Box<dyn Relay>) {
        self.relay = Some(relay);
    }

    /// Chain height: the number of blocks on the active chain
    pub fn height(&self) -> u64 {
        self.active_chain.len() as u64
    }

    pub fn tip(&self) -> Option<&Block> {
        self.active_chain.last()
    }

    pub fn active_chain(&self) -> &[Block] {
        &self.active_chain
    }

    pub fn side_branches(&self) -> &[Vec<Block>] {
        &self.side_branches
    }

    pub fn orphan_blocks(&self) -> &[Block] {
        &self.orphan_blocks
    }

    pub fn utxo(&self) -> &UtxoSet {
        &self.utxo
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    /// Flag the miner polls to abandon a stale candidate block
    pub fn mine_interrupt(&self) -> Arc<AtomicBool> {
        self.mine_interrupt.clone()
    }

    /// Median timestamp of the newest `count` blocks.
    ///
    /// Returns 0 for an empty chain so any timestamp passes.
    pub fn median_time_past(&self, count: usize) -> u64 {
        if self.active_chain.is_empty() {
            return 0;
        }
        let recent: Vec<u64> = self
            .active_chain
            .iter()
            .rev()
            .take(count)
            .map(|b| b.header.timestamp)
            .collect();
        recent[recent.len() / 2]
    }

    /// Find a block by id across the active chain and, unless
    /// `active_only`, every side branch. Returns the block, its height
    /// within its chain, and the chain index.
    pub fn locate_block(&self, block_id: &Hash, active_only: bool) -> Option<(Block, u64, usize)> {
        let mut chains: Vec<&Vec<Block>> = vec![&self.active_chain];
        if !active_only {
            chains.extend(self.side_branches.iter());
        }
        for (chain_idx, chain) in chains.into_iter().enumerate() {
            for (height, block) in chain.iter().enumerate() {
                if block.id() == *block_id {
                    return Some((block.clone(), height as u64, chain_idx));
                }
            }
        }
        None
    }

    /// Validate a block and attach it to the chain it belongs on.
    ///
    /// Returns the index of the chain the block landed on, or `None` if
    /// it was a duplicate, an orphan, or invalid. `doing_reorg` narrows
    /// duplicate detection to the active chain, since the branch being
    /// replayed still sits in `side_branches`.
    pub fn connect_block(&mut self, block: Block, doing_reorg: bool) -> Option<usize> {
        let block_id = block.id();

        if self.locate_block(&block_id, doing_reorg).is_some() {
            debug!(block_id = %block_id, "ignoring already-seen block");
            return None;
        }

        let chain_idx = match validate_block(&block, self) {
            Ok(idx) => idx,
            Err(err) if err.is_orphan() => {
                info!(block_id = %block_id, "parking orphan block");
                self.orphan_blocks.push(block);
                return None;
            }
            Err(err) => {
                warn!(block_id = %block_id, %err, "block failed validation");
                return None;
            }
        };

        if chain_idx != ACTIVE_CHAIN_IDX && self.side_branches.len() < chain_idx {
            info!(chain_idx, "creating a new side branch");
            self.side_branches.push(Vec::new());
        }

        info!(block_id = %block_id, chain_idx, "connecting block");
        if chain_idx == ACTIVE_CHAIN_IDX {
            let height = self.active_chain.len() as u64;
            for txn in &block.txns {
                let txid = txn.id();
                self.mempool.remove(&txid);

                if !txn.is_coinbase() {
                    for txin in &txn.txins {
                        if let Some(outpoint) = txin.outpoint {
                            self.utxo
                                .remove(&outpoint)
                                .expect("validated spend must exist in the UTXO set");
                        }
                    }
                }
                for (idx, txout) in txn.txouts.iter().enumerate() {
                    self.utxo.add(txout, txid, idx as u32, txn.is_coinbase(), height);
                }
            }
            self.active_chain.push(block.clone());
        } else {
            self.side_branches[chain_idx - 1].push(block.clone());
        }

        if (!doing_reorg && self.reorg_if_necessary()) || chain_idx == ACTIVE_CHAIN_IDX {
            self.mine_interrupt.store(true, Ordering::SeqCst);
            info!(height = self.active_chain.len(), "active chain extended");
        }

        if let Some(relay) = &self.relay {
            relay.relay_block(&block);
        }

        // A parked orphan may now have its parent.
        let (ready, rest): (Vec<Block>, Vec<Block>) = self
            .orphan_blocks
            .drain(..)
            .partition(|o| o.header.prev_block_hash == Some(block_id));
        self.orphan_blocks = rest;
        for orphan in ready {
            info!(block_id = %orphan.id(), "retrying orphan block");
            self.connect_block(orphan, doing_reorg);
        }

        Some(chain_idx)
    }

    /// Remove the tip block, returning its transactions to the mempool
    /// and rewinding its UTXO effects.
    pub fn disconnect_block(&mut self) -> Result<Block, ChainError> {
        let block = self.active_chain.last().cloned().ok_or(ChainError::NotTip)?;

        // Reverse order, so an output spent by a later transaction in the
        // same block is restored before its creator removes it.
        for txn in block.txns.iter().rev() {
            let txid = txn.id();
            self.mempool.restore(txn.clone());

            for txin in &txn.txins {
                if let Some(outpoint) = txin.outpoint {
                    let utxo = self
                        .find_txout_for_txin(txin)
                        .ok_or(ChainError::MissingSpentOutput(outpoint))?;
                    self.utxo.add_existing(utxo);
                }
            }
            for idx in 0..txn.txouts.len() {
                let outpoint = OutPoint::new(txid, idx as u32);
                self.utxo
                    .remove(&outpoint)
                    .map_err(|_| ChainError::MissingSpentOutput(outpoint))?;
            }
        }

        self.active_chain.pop();
        info!(block_id = %block.id(), height = self.active_chain.len(), "block disconnected");
        Ok(block)
    }

    /// Reconstruct the unspent output a given input consumed, scanning
    /// the active chain for the transaction that created it.
    fn find_txout_for_txin(&self, txin: &TxIn) -> Option<UnspentTxOut> {
        let outpoint = txin.outpoint?;
        for (height, block) in self.active_chain.iter().enumerate() {
            for txn in &block.txns {
                if txn.id() == outpoint.txid {
                    let txout = txn.txouts.get(outpoint.index as usize)?;
                    return Some(UnspentTxOut::new(
                        txout,
                        outpoint.txid,
                        outpoint.index,
                        txn.is_coinbase(),
                        height as u64,
                    ));
                }
            }
        }
        None
    }

    /// Check every side branch against the active chain and reorganize
    /// onto the first one that is longer. Returns whether a reorg
    /// happened.
    fn reorg_if_necessary(&mut self) -> bool {
        let mut reorged = false;
        let branches = self.side_branches.clone();

        for (i, branch) in branches.iter().enumerate() {
            let branch_idx = i + 1;
            let fork_block = match branch.first() {
                Some(block) => block,
                None => continue,
            };
            let prev_hash = match fork_block.header.prev_block_hash {
                Some(hash) => hash,
                None => continue,
            };
            let (_, fork_height, _) = match self.locate_block(&prev_hash, true) {
                Some(found) => found,
                None => continue,
            };

            if branch.len() as u64 + fork_height > self.active_chain.len() as u64 {
                info!(
                    branch_idx,
                    branch_len = branch.len(),
                    fork_height,
                    "side branch outgrew the active chain, reorging"
                );
                reorged |= self.try_reorg(branch.clone(), branch_idx, fork_height);
            }
        }

        reorged
    }

    /// Attempt to make `branch` the active chain past `fork_height`.
    ///
    /// On any branch block failing full validation, the old chain is
    /// restored; a previously valid block failing to reconnect is
    /// unrecoverable corruption and aborts the process.
    fn try_reorg(&mut self, branch: Vec<Block>, branch_idx: usize, fork_height: u64) -> bool {
        let fork_len = fork_height as usize + 1;

        let mut old_active = Vec::new();
        while self.active_chain.len() > fork_len {
            match self.disconnect_block() {
                Ok(block) => old_active.push(block),
                Err(err) => panic!("disconnect during reorg failed: {err}"),
            }
        }
        old_active.reverse();

        for block in &branch {
            if self.connect_block(block.clone(), true) != Some(ACTIVE_CHAIN_IDX) {
                warn!(branch_idx, "reorg hit an invalid branch block, rolling back");
                while self.active_chain.len() > fork_len {
                    match self.disconnect_block() {
                        Ok(_) => {}
                        Err(err) => panic!("rollback disconnect failed: {err}"),
                    }
                }
                for old in &old_active {
                    let restored = self.connect_block(old.clone(), true);
                    assert_eq!(
                        restored,
                        Some(ACTIVE_CHAIN_IDX),
                        "previously valid block failed to reconnect"
                    );
                }
                return false;
            }
        }

        self.side_branches.remove(branch_idx - 1);
        self.side_branches.push(old_active);
        info!(height = self.active_chain.len(), "reorg complete");
        true
    }

    /// Admit a transaction to the mempool.
    ///
    /// Returns whether it was accepted; a transaction missing an input is
    /// parked as an orphan rather than rejected.
    pub fn accept_transaction(&mut self, txn: Transaction) -> bool {
        let txid = txn.id();
        if self.mempool.contains(&txid) {
            debug!(txid = %txid, "transaction already in mempool");
            return false;
        }

        match validate_transaction(&txn, self, false, None, true) {
            Ok(()) => {
                info!(txid = %txid, "transaction added to mempool");
                self.mempool.insert(txn.clone());
                if let Some(relay) = &self.relay {
                    relay.relay_transaction(&txn);
                }
                true
            }
            Err(err) if err.is_orphan_candidate() => {
                info!(txid = %txid, "parking orphan transaction");
                self.mempool.park_orphan(txn);
                false
            }
            Err(err) => {
                warn!(txid = %txid, %err, "transaction rejected");
                false
            }
        }
    }

    /// Active-chain blocks following `block_id`, capped at one sync
    /// chunk. An unknown id yields blocks from just past genesis.
    pub fn blocks_since(&self, block_id: &Hash) -> Vec<Block> {
        let start = match self.locate_block(block_id, true) {
            Some((_, height, _)) => height as usize + 1,
            None => 1,
        };
        self.active_chain
            .iter()
            .skip(start)
            .take(GET_BLOCKS_CHUNK_SIZE)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::BlockHeader;
    use crate::crypto::sha256d;

    fn bare_block(prev: Option<Hash>, timestamp: u64) -> Block {
        Block::new(
            BlockHeader {
                version: 0,
                prev_block_hash: prev,
                merkle_root: sha256d(&timestamp.to_le_bytes()),
                timestamp,
                bits: 1,
                nonce: 0,
            },
            vec![],
        )
    }

    fn chain_of(timestamps: &[u64]) -> Vec<Block> {
        let mut blocks: Vec<Block> = Vec::new();
        for &ts in timestamps {
            let prev = blocks.last().map(|b: &Block| b.id());
            blocks.push(bare_block(prev, ts));
        }
        blocks
    }

    #[test]
    fn test_median_time_past() {
        let mut state = ChainState::empty();
        assert_eq!(state.median_time_past(11), 0);

        state.set_active_chain(chain_of(&[1, 30, 60, 90, 400]));
        assert_eq!(state.median_time_past(1), 400);
        assert_eq!(state.median_time_past(3), 90);
        assert_eq!(state.median_time_past(2), 90);
        assert_eq!(state.median_time_past(5), 60);
    }

    #[test]
    fn test_locate_block() {
        let mut state = ChainState::empty();
        let blocks = chain_of(&[10, 20, 30]);
        let wanted = blocks[1].id();
        state.set_active_chain(blocks);

        let (found, height, chain_idx) = state.locate_block(&wanted, false).unwrap();
        assert_eq!(found.id(), wanted);
        assert_eq!(height, 1);
        assert_eq!(chain_idx, ACTIVE_CHAIN_IDX);

        assert!(state.locate_block(&sha256d(b"absent"), false).is_none());
    }

    #[test]
    fn test_blocks_since() {
        let mut state = ChainState::empty();
        let blocks = chain_of(&[10, 20, 30, 40]);
        let second = blocks[1].id();
        let tip = blocks[3].id();
        state.set_active_chain(blocks);

        let rest = state.blocks_since(&second);
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].header.timestamp, 30);

        assert!(state.blocks_since(&tip).is_empty());

        // Unknown ids restart the walk just past genesis.
        let from_unknown = state.blocks_since(&sha256d(b"absent"));
        assert_eq!(from_unknown.len(), 3);
        assert_eq!(from_unknown[0].header.timestamp, 20);
    }
}
