//! Disk persistence
//!
//! The active chain is stored in sled, keyed by big-endian height so an
//! ordered scan yields blocks oldest first. On startup the stored blocks
//! are replayed through full validation rather than trusted.

use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::consensus::Block;

/// Persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("block encoding error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Sled-backed store for the active chain
pub struct ChainStore {
    db: sled::Db,
}

impl ChainStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    /// Persist the active chain, replacing whatever was stored before.
    pub fn save_chain(&self, chain: &[Block]) -> Result<(), StoreError> {
        self.db.clear()?;
        for (height, block) in chain.iter().enumerate() {
            let key = (height as u64).to_be_bytes();
            let value = bincode::serialize(block)?;
            self.db.insert(key, value)?;
        }
        self.db.flush()?;
        Ok(())
    }

    /// Load stored blocks ordered by height.
    pub fn load_chain(&self) -> Result<Vec<Block>, StoreError> {
        let mut blocks = Vec::new();
        for entry in self.db.iter() {
            let (_, value) = entry?;
            blocks.push(bincode::deserialize(&value)?);
        }
        info!(count = blocks.len(), "loaded blocks from disk");
        Ok(blocks)
    }
}
