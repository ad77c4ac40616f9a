//! Genesis block
//!
//! Fixed for the whole network. It is seeded into the chain state
//! directly rather than validated, so it carries no proof-of-work.

use crate::consensus::{Block, BlockHeader};
use crate::crypto::Hash;
use crate::params::{INITIAL_DIFFICULTY_BITS, INITIAL_SUBSIDY};
use crate::validation::Transaction;

/// Address the genesis subsidy pays to; nobody holds its key.
const GENESIS_ADDRESS: &str = "143UVyz7ooiAv1pMqbwPPpnH4BV9ifJGFF";

const GENESIS_TIMESTAMP: u64 = 1_501_821_412;

pub fn create_genesis_block() -> Block {
    let coinbase = Transaction::create_coinbase(GENESIS_ADDRESS, INITIAL_SUBSIDY, 0);
    let mut block = Block::new(
        BlockHeader {
            version: 0,
            prev_block_hash: None,
            merkle_root: Hash::zero(),
            timestamp: GENESIS_TIMESTAMP,
            bits: INITIAL_DIFFICULTY_BITS,
            nonce: 0,
        },
        vec![coinbase],
    );
    block.header.merkle_root = block.computed_merkle_root();
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_is_stable() {
        let a = create_genesis_block();
        let b = create_genesis_block();
        assert_eq!(a.id(), b.id());
        assert!(a.is_genesis());
        assert_eq!(a.header.merkle_root, a.computed_merkle_root());
        assert_eq!(a.txns[0].txouts[0].value, INITIAL_SUBSIDY);
    }
}
