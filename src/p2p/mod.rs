//! Peer-to-peer module - wire protocol, peer tracking, and relay

mod peer;
mod protocol;

pub use peer::*;
pub use protocol::*;
