//! minichain core library
//!
//! A minimal proof-of-work cryptocurrency: a replicated UTXO ledger with
//! chain reorganization, a mempool with orphan handling, and an
//! interruptible block miner.

pub mod consensus;
pub mod crypto;
pub mod mining;
pub mod node;
pub mod p2p;
pub mod storage;
pub mod validation;
pub mod wallet;

/// Protocol constants - HARD-CODED, NEVER CONFIGURABLE
pub mod params {
    /// Base units per coin (8 decimal places)
    pub const COIN: u64 = 100_000_000;

    /// Total coin supply
    pub const TOTAL_COINS: u64 = 21_000_000;

    /// Maximum amount of money in base units
    pub const MAX_MONEY: u64 = COIN * TOTAL_COINS;

    /// Maximum serialized block size in bytes
    pub const MAX_BLOCK_SERIALIZED_SIZE: u64 = 1_000_000;

    /// Confirmations before a coinbase output may be spent
    pub const COINBASE_MATURITY: u64 = 2;

    /// Maximum tolerated clock skew for block timestamps (seconds)
    pub const MAX_FUTURE_BLOCK_TIME: u64 = 60 * 60 * 2;

    /// Target seconds between blocks
    pub const TIME_BETWEEN_BLOCKS_TARGET: u64 = 60;

    /// Target length of one difficulty period (seconds)
    pub const DIFFICULTY_PERIOD_IN_SECS_TARGET: u64 = 60 * 60 * 10;

    /// Blocks per difficulty period
    pub const DIFFICULTY_PERIOD_IN_BLOCKS: u64 =
        DIFFICULTY_PERIOD_IN_SECS_TARGET / TIME_BETWEEN_BLOCKS_TARGET;

    /// Difficulty of the genesis block, as a leading-zero-bit count
    pub const INITIAL_DIFFICULTY_BITS: u32 = 16;

    /// Blocks between subsidy halvings
    pub const HALVE_SUBSIDY_AFTER_BLOCKS: u64 = 210_000;

    /// Initial block subsidy in base units
    pub const INITIAL_SUBSIDY: u64 = 50 * COIN;

    /// Blocks sampled for the median-time-past check
    pub const MEDIAN_TIME_PAST_BLOCKS: usize = 11;

    /// Nonce attempts between mining-interrupt polls
    pub const MINE_INTERRUPT_CHECK_EVERY: u64 = 10_000;

    /// Maximum blocks returned for one GetBlocks request
    pub const GET_BLOCKS_CHUNK_SIZE: usize = 50;
}
