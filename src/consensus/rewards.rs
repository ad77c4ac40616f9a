//! Block rewards
//!
//! The miner of a block earns the height-dependent subsidy plus the fees
//! implicit in its transactions.

use crate::consensus::Block;
use crate::params::{HALVE_SUBSIDY_AFTER_BLOCKS, INITIAL_SUBSIDY};
use crate::storage::{find_utxo_in_list, UtxoSet};

/// Subsidy paid by the coinbase of a block at `height`.
///
/// Halves every `HALVE_SUBSIDY_AFTER_BLOCKS` blocks and reaches zero
/// after 64 halvings.
pub fn block_subsidy(height: u64) -> u64 {
    let halvings = height / HALVE_SUBSIDY_AFTER_BLOCKS;
    if halvings >= 64 {
        return 0;
    }
    INITIAL_SUBSIDY >> halvings
}

/// Total fees carried by a block's transactions.
///
/// A transaction's fee is its input value minus its output value; inputs
/// resolve from the UTXO set or from earlier transactions in the same
/// block.
pub fn calculate_fees(block: &Block, utxo_set: &UtxoSet) -> u64 {
    let mut fees: u64 = 0;

    for txn in &block.txns {
        if txn.is_coinbase() {
            continue;
        }

        let mut spent: u64 = 0;
        for txin in &txn.txins {
            let outpoint = match txin.outpoint {
                Some(outpoint) => outpoint,
                None => continue,
            };
            let value = utxo_set
                .get(&outpoint)
                .map(|u| u.value)
                .or_else(|| find_utxo_in_list(&outpoint, &block.txns).map(|u| u.value))
                .unwrap_or(0);
            spent += value;
        }

        fees += spent.saturating_sub(txn.total_output_value());
    }

    fees
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::BlockHeader;
    use crate::crypto::{sha256d, Hash, PrivateKey};
    use crate::params::COIN;
    use crate::validation::{make_txin, OutPoint, Transaction, TxOut};

    #[test]
    fn test_subsidy_halves() {
        assert_eq!(block_subsidy(0), 50 * COIN);
        assert_eq!(block_subsidy(HALVE_SUBSIDY_AFTER_BLOCKS - 1), 50 * COIN);
        assert_eq!(block_subsidy(HALVE_SUBSIDY_AFTER_BLOCKS), 25 * COIN);
        assert_eq!(block_subsidy(HALVE_SUBSIDY_AFTER_BLOCKS * 2), 25 * COIN / 2);
    }

    #[test]
    fn test_subsidy_exhausts() {
        assert_eq!(block_subsidy(HALVE_SUBSIDY_AFTER_BLOCKS * 64), 0);
        assert_eq!(block_subsidy(u64::MAX), 0);
    }

    #[test]
    fn test_fees_from_utxo_and_siblings() {
        let key = PrivateKey::generate();
        let addr = key.public_key().to_address();

        let mut utxo_set = UtxoSet::new();
        let funding = Transaction::create_coinbase(&addr, 100, 1);
        utxo_set.add(&funding.txouts[0], funding.id(), 0, false, 1);

        // Spends 100, pays 90: fee 10.
        let parent_outs = vec![TxOut {
            value: 90,
            to_addr: addr.clone(),
        }];
        let parent = Transaction::new(
            vec![make_txin(&key, OutPoint::new(funding.id(), 0), &parent_outs, 0)],
            parent_outs,
        );

        // Spends the sibling's 90, pays 85: fee 5.
        let child_outs = vec![TxOut {
            value: 85,
            to_addr: addr,
        }];
        let child = Transaction::new(
            vec![make_txin(&key, OutPoint::new(parent.id(), 0), &child_outs, 0)],
            child_outs,
        );

        let block = Block::new(
            BlockHeader {
                version: 0,
                prev_block_hash: Some(sha256d(b"prev")),
                merkle_root: Hash::zero(),
                timestamp: 0,
                bits: 16,
                nonce: 0,
            },
            vec![parent, child],
        );

        assert_eq!(calculate_fees(&block, &utxo_set), 15);
    }
}
