//! Block structure
//!
//! A block's identity is the double hash of its header; the header binds
//! the transaction set through the merkle root.

use serde::{Deserialize, Serialize};

use crate::crypto::{merkle_root, sha256d, Hash};
use crate::validation::Transaction;

/// Block header containing all proof-of-work metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Protocol version
    pub version: u32,
    /// Id of the previous block; `None` only for genesis
    pub prev_block_hash: Option<Hash>,
    /// Merkle root over the block's txids
    pub merkle_root: Hash,
    /// Creation time (seconds since Unix epoch)
    pub timestamp: u64,
    /// Required leading zero bits of the block id
    pub bits: u32,
    /// Nonce incremented during the proof search
    pub nonce: u64,
}

impl BlockHeader {
    /// Fixed-width byte encoding used for hashing
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(86);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        match &self.prev_block_hash {
            Some(hash) => {
                bytes.push(1);
                bytes.extend_from_slice(&hash.0);
            }
            None => {
                bytes.push(0);
                bytes.extend_from_slice(&[0u8; 32]);
            }
        }
        bytes.extend_from_slice(&self.merkle_root.0);
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.bits.to_le_bytes());
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    /// Header hash: the block id
    pub fn hash(&self) -> Hash {
        sha256d(&self.to_bytes())
    }
}

/// A complete block: header plus ordered transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txns: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, txns: Vec<Transaction>) -> Self {
        Self { header, txns }
    }

    /// Block id
    pub fn id(&self) -> Hash {
        self.header.hash()
    }

    /// Merkle root recomputed from this block's transactions
    pub fn computed_merkle_root(&self) -> Hash {
        let txids: Vec<Hash> = self.txns.iter().map(|t| t.id()).collect();
        merkle_root(&txids)
    }

    pub fn is_genesis(&self) -> bool {
        self.header.prev_block_hash.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> BlockHeader {
        BlockHeader {
            version: 0,
            prev_block_hash: None,
            merkle_root: Hash::zero(),
            timestamp: 1234567890,
            bits: 16,
            nonce: 0,
        }
    }

    #[test]
    fn test_header_byte_length() {
        // version(4) + presence(1) + prev(32) + merkle(32) + time(8) + bits(4) + nonce(8)
        assert_eq!(header().to_bytes().len(), 89);
    }

    #[test]
    fn test_genesis_prev_distinct_from_zero_hash() {
        let genesis = header();
        let zeroed = BlockHeader {
            prev_block_hash: Some(Hash::zero()),
            ..header()
        };
        assert_ne!(genesis.hash(), zeroed.hash());
    }

    #[test]
    fn test_nonce_changes_id() {
        let a = header();
        let b = BlockHeader { nonce: 1, ..header() };
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_block_roundtrip() {
        let block = Block::new(
            header(),
            vec![crate::validation::Transaction::create_coinbase("addr", 50, 0)],
        );
        let bytes = bincode::serialize(&block).unwrap();
        let decoded: Block = bincode::deserialize(&bytes).unwrap();
        assert_eq!(block, decoded);
        assert_eq!(block.id(), decoded.id());
    }
}
