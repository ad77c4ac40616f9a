//! Cryptography module - double SHA-256 hashing, ECDSA keys, Merkle trees

mod hash;
mod keys;
mod merkle;

pub use hash::*;
pub use keys::*;
pub use merkle::*;
