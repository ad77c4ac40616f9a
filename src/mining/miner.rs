//! Block assembly and proof-of-work
//!
//! The miner builds a candidate block from the mempool, then searches
//! nonces until the block id has enough leading zero bits. The search is
//! interruptible so a newly connected block invalidating the candidate
//! wastes as little work as possible.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, info};

use crate::consensus::{block_subsidy, calculate_fees, next_work_required, Block, BlockHeader};
use crate::crypto::Hash;
use crate::params::{MAX_BLOCK_SERIALIZED_SIZE, MEDIAN_TIME_PAST_BLOCKS, MINE_INTERRUPT_CHECK_EVERY};
use crate::storage::ChainState;
use crate::validation::Transaction;

/// Mining errors
#[derive(Debug, Error)]
pub enum MiningError {
    #[error("cannot assemble a block on an empty chain")]
    EmptyChain,
    #[error("assembled block serializes to {size} bytes, over the limit")]
    OversizeBlock { size: u64 },
    #[error("block encoding error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Assembles and mines blocks paying a fixed reward address
#[derive(Clone)]
pub struct Miner {
    reward_addr: String,
    interrupt: Arc<AtomicBool>,
}

impl Miner {
    /// `interrupt` is shared with the chain state, which raises it when a
    /// new block lands on the active chain.
    pub fn new(reward_addr: String, interrupt: Arc<AtomicBool>) -> Self {
        Self {
            reward_addr,
            interrupt,
        }
    }

    /// Abort an in-progress proof search
    pub fn stop(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    /// Build a candidate block on the current tip.
    ///
    /// With `txns` unset, transactions are drawn from the mempool up to
    /// the block size limit; the coinbase claiming subsidy plus fees is
    /// prepended either way.
    pub fn assemble_block(
        &self,
        chain: &ChainState,
        txns: Option<Vec<Transaction>>,
    ) -> Result<Block, MiningError> {
        let tip = chain.tip().ok_or(MiningError::EmptyChain)?;
        let prev_hash = tip.id();
        let height = chain.height();

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        // Has to beat the median-time-past check even on fast chains.
        let timestamp = now.max(chain.median_time_past(MEDIAN_TIME_PAST_BLOCKS) + 1);

        let header = BlockHeader {
            version: 0,
            prev_block_hash: Some(prev_hash),
            merkle_root: Hash::zero(),
            timestamp,
            bits: next_work_required(Some(&prev_hash), chain),
            nonce: 0,
        };

        let mut block = Block::new(header, Vec::new());
        match txns {
            Some(txns) => block.txns = txns,
            None => {
                block = chain
                    .mempool()
                    .select_for_block(chain.utxo(), block, MAX_BLOCK_SERIALIZED_SIZE)
            }
        }

        let fees = calculate_fees(&block, chain.utxo());
        let coinbase =
            Transaction::create_coinbase(&self.reward_addr, block_subsidy(height) + fees, height);
        block.txns.insert(0, coinbase);
        block.header.merkle_root = block.computed_merkle_root();

        let size = bincode::serialized_size(&block)?;
        if size > MAX_BLOCK_SERIALIZED_SIZE {
            return Err(MiningError::OversizeBlock { size });
        }

        Ok(block)
    }

    /// Search for a nonce satisfying the block's difficulty.
    ///
    /// Starts from a random nonce so competing miners do not retrace each
    /// other's work. Returns `None` if interrupted.
    pub fn mine(&self, mut block: Block) -> Option<Block> {
        let start = Instant::now();
        let bits = block.header.bits;
        let mut nonce: u64 = rand::random();
        let mut attempts: u64 = 0;

        self.interrupt.store(false, Ordering::SeqCst);
        debug!(bits, "starting proof-of-work search");

        loop {
            block.header.nonce = nonce;
            if block.header.hash().satisfies_bits(bits) {
                let secs = start.elapsed().as_secs_f64();
                let rate = if secs > 0.0 {
                    (attempts as f64 / secs) as u64
                } else {
                    0
                };
                info!(block_id = %block.id(), nonce, hashes_per_sec = rate, "block found");
                return Some(block);
            }

            nonce = nonce.wrapping_add(1);
            attempts += 1;
            if attempts % MINE_INTERRUPT_CHECK_EVERY == 0 && self.interrupt.load(Ordering::SeqCst)
            {
                info!(attempts, "mining interrupted");
                self.interrupt.store(false, Ordering::SeqCst);
                return None;
            }
        }
    }
}
