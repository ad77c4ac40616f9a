//! Storage module - UTXO set, mempool, chain state, and disk persistence

mod db;
mod mempool;
mod state;
mod utxo;

pub use db::*;
pub use mempool::*;
pub use state::*;
pub use utxo::*;
