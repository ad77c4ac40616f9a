//! Mining module - block assembly and the proof-of-work search

mod miner;

pub use miner::*;
