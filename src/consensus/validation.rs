//! Block and transaction validation
//!
//! Pure checks against a chain snapshot. Nothing here mutates state;
//! `ChainState` applies the effects once validation passes.

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::consensus::{next_work_required, Block};
use crate::params::{COINBASE_MATURITY, MAX_FUTURE_BLOCK_TIME, MEDIAN_TIME_PAST_BLOCKS};
use crate::storage::{find_utxo_in_list, ChainState, ACTIVE_CHAIN_IDX};
use crate::validation::{build_spend_message, unlock_signature, Transaction};

/// Transaction validation errors
#[derive(Debug, Error)]
pub enum TxnError {
    #[error("transaction has no inputs")]
    NoInputs,
    #[error("transaction has no outputs")]
    NoOutputs,
    #[error("output value out of range")]
    ValueOutOfRange,
    #[error("input {0} references an unknown output")]
    MissingInput(usize),
    #[error("coinbase output spent before maturity")]
    ImmatureCoinbase,
    #[error("input signature does not unlock the referenced output")]
    BadSignature,
    #[error("inputs provide {available} but outputs require {required}")]
    InsufficientFunds { available: u64, required: u64 },
}

impl TxnError {
    /// A transaction failing only because an input is unknown may become
    /// valid once its parent arrives; callers park it instead of
    /// rejecting.
    pub fn is_orphan_candidate(&self) -> bool {
        matches!(self, TxnError::MissingInput(_))
    }
}

/// Block validation errors
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("block has no transactions")]
    NoTransactions,
    #[error("block timestamp too far in the future")]
    TimestampTooFarInFuture,
    #[error("block id does not satisfy its claimed difficulty")]
    InsufficientProof,
    #[error("first transaction must be the only coinbase")]
    BadCoinbaseLayout,
    #[error("transaction {index} invalid: {source}")]
    InvalidTxn { index: usize, source: TxnError },
    #[error("merkle root does not match block transactions")]
    BadMerkleRoot,
    #[error("block timestamp not past the median of recent blocks")]
    TimestampTooOld,
    #[error("previous block not found in any chain")]
    UnknownParent,
    #[error("difficulty bits incorrect: expected {expected}, got {got}")]
    WrongBits { expected: u32, got: u32 },
}

impl BlockError {
    /// Blocks with an unknown parent are parked, not discarded.
    pub fn is_orphan(&self) -> bool {
        matches!(self, BlockError::UnknownParent)
    }
}

/// Validate a transaction against the current chain state.
///
/// Inputs resolve against the UTXO set first, then `siblings` (earlier
/// transactions in the same candidate block), then the mempool when
/// `allow_mempool` is set.
pub fn validate_transaction(
    txn: &Transaction,
    chain: &ChainState,
    as_coinbase: bool,
    siblings: Option<&[Transaction]>,
    allow_mempool: bool,
) -> Result<(), TxnError> {
    txn.validate_basics(as_coinbase)?;

    // Only the block path vouches for a coinbase; a coinbase-shaped
    // transaction from a peer falls through to input resolution, where
    // its null outpoint fails as a missing input.
    if as_coinbase && txn.is_coinbase() {
        return Ok(());
    }

    let mut available: u64 = 0;
    for (i, txin) in txn.txins.iter().enumerate() {
        let outpoint = txin.outpoint.ok_or(TxnError::MissingInput(i))?;

        let utxo = chain
            .utxo()
            .get(&outpoint)
            .cloned()
            .or_else(|| siblings.and_then(|txns| find_utxo_in_list(&outpoint, txns)))
            .or_else(|| {
                if allow_mempool {
                    chain.mempool().find_utxo(&outpoint)
                } else {
                    None
                }
            })
            .ok_or(TxnError::MissingInput(i))?;

        if utxo.is_coinbase && chain.height().saturating_sub(utxo.height) < COINBASE_MATURITY {
            return Err(TxnError::ImmatureCoinbase);
        }

        let pubkey = txin.signature.unlock_pk.as_ref().ok_or(TxnError::BadSignature)?;
        if pubkey.to_address() != utxo.to_addr {
            return Err(TxnError::BadSignature);
        }
        let message = build_spend_message(&outpoint, pubkey, txin.sequence, &txn.txouts);
        let signature = unlock_signature(txin).ok_or(TxnError::BadSignature)?;
        if !pubkey.verify(&message, &signature) {
            return Err(TxnError::BadSignature);
        }

        available = available
            .checked_add(utxo.value)
            .ok_or(TxnError::ValueOutOfRange)?;
    }

    let required = txn.total_output_value();
    if available < required {
        return Err(TxnError::InsufficientFunds {
            available,
            required,
        });
    }

    Ok(())
}

/// Validate a block and decide which chain it extends.
///
/// Returns the index of the chain the block belongs on: 0 for the active
/// chain, 1.. for a side branch. Blocks bound for a side branch get only
/// context-free checks; full contextual validation happens if the branch
/// is later reorged in.
pub fn validate_block(block: &Block, chain: &ChainState) -> Result<usize, BlockError> {
    if block.txns.is_empty() {
        return Err(BlockError::NoTransactions);
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    if block.header.timestamp > now + MAX_FUTURE_BLOCK_TIME {
        return Err(BlockError::TimestampTooFarInFuture);
    }

    if !block.id().satisfies_bits(block.header.bits) {
        return Err(BlockError::InsufficientProof);
    }

    let coinbase_idxs: Vec<usize> = block
        .txns
        .iter()
        .enumerate()
        .filter(|(_, txn)| txn.is_coinbase())
        .map(|(i, _)| i)
        .collect();
    if coinbase_idxs != [0] {
        return Err(BlockError::BadCoinbaseLayout);
    }

    for (index, txn) in block.txns.iter().enumerate() {
        txn.validate_basics(index == 0)
            .map_err(|source| BlockError::InvalidTxn { index, source })?;
    }

    if block.computed_merkle_root() != block.header.merkle_root {
        return Err(BlockError::BadMerkleRoot);
    }

    if block.header.timestamp <= chain.median_time_past(MEDIAN_TIME_PAST_BLOCKS) {
        return Err(BlockError::TimestampTooOld);
    }

    match block.header.prev_block_hash {
        None => {
            // Only an empty chain accepts a parentless block.
            if chain.height() != 0 {
                return Err(BlockError::UnknownParent);
            }
        }
        Some(prev_hash) => {
            let (prev_block, _, prev_chain_idx) = chain
                .locate_block(&prev_hash, false)
                .ok_or(BlockError::UnknownParent)?;

            if prev_chain_idx != ACTIVE_CHAIN_IDX {
                // Extends an existing side branch; no contextual checks.
                return Ok(prev_chain_idx);
            }
            if prev_block.id() != chain.tip().map(|b| b.id()).unwrap_or_default() {
                // Forks off the active chain below the tip; starts (or
                // joins) a side branch.
                return Ok(prev_chain_idx + 1);
            }
        }
    }

    let expected = next_work_required(block.header.prev_block_hash.as_ref(), chain);
    if block.header.bits != expected {
        return Err(BlockError::WrongBits {
            expected,
            got: block.header.bits,
        });
    }

    for (index, txn) in block.txns.iter().enumerate().skip(1) {
        validate_transaction(txn, chain, false, Some(&block.txns[1..]), false)
            .map_err(|source| BlockError::InvalidTxn { index, source })?;
    }

    Ok(ACTIVE_CHAIN_IDX)
}
