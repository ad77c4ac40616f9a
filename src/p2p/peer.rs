//! Peer tracking and outbound delivery
//!
//! Peers are plain socket addresses. Delivery is best-effort with a few
//! retries; a peer that stays unreachable is evicted.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::consensus::Block;
use crate::p2p::Message;
use crate::storage::Relay;
use crate::validation::Transaction;

const SEND_TRIES: u32 = 3;
const SEND_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Shared set of known peer addresses
#[derive(Debug, Clone, Default)]
pub struct PeerSet {
    peers: Arc<Mutex<HashSet<SocketAddr>>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, addr: SocketAddr) {
        let mut peers = self.peers.lock().expect("peer set lock poisoned");
        if peers.insert(addr) {
            info!(%addr, "added peer");
        }
    }

    pub fn remove(&self, addr: &SocketAddr) {
        self.peers.lock().expect("peer set lock poisoned").remove(addr);
    }

    pub fn snapshot(&self) -> Vec<SocketAddr> {
        self.peers
            .lock()
            .expect("peer set lock poisoned")
            .iter()
            .copied()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().expect("peer set lock poisoned").is_empty()
    }
}

/// Fire-and-forget delivery of one message to one peer.
///
/// Retries a few times with a fixed delay, then evicts the peer. Returns
/// whether the message was written.
pub async fn send_to_peer(peers: &PeerSet, addr: SocketAddr, message: &Message) -> bool {
    let frame = match message.to_bytes() {
        Ok(frame) => frame,
        Err(err) => {
            warn!(%err, "failed to encode outbound message");
            return false;
        }
    };

    for attempt in 1..=SEND_TRIES {
        match TcpStream::connect(addr).await {
            Ok(mut stream) => {
                use tokio::io::AsyncWriteExt;
                match stream.write_all(&frame).await {
                    Ok(()) => return true,
                    Err(err) => warn!(%addr, attempt, %err, "write to peer failed"),
                }
            }
            Err(err) => warn!(%addr, attempt, %err, "connect to peer failed"),
        }
        tokio::time::sleep(SEND_RETRY_DELAY).await;
    }

    info!(%addr, "evicting unreachable peer");
    peers.remove(&addr);
    false
}

/// Connect to a peer, send a request, and read one reply frame.
pub async fn request(addr: SocketAddr, message: &Message) -> Result<Message, crate::p2p::ProtocolError> {
    let mut stream = TcpStream::connect(addr).await?;
    message.write_to(&mut stream).await?;
    Message::read_from(&mut stream).await
}

/// What the chain state hands off for network distribution
#[derive(Debug, Clone)]
pub enum RelayEvent {
    Block(Block),
    Transaction(Transaction),
}

/// `Relay` implementation that queues events on a channel.
///
/// Sending never blocks, so this is safe to call while holding the chain
/// lock; a background task drains the channel and talks to peers.
pub struct ChannelRelay {
    tx: mpsc::UnboundedSender<RelayEvent>,
}

impl ChannelRelay {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RelayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Relay for ChannelRelay {
    fn relay_block(&self, block: &Block) {
        let _ = self.tx.send(RelayEvent::Block(block.clone()));
    }

    fn relay_transaction(&self, txn: &Transaction) {
        let _ = self.tx.send(RelayEvent::Transaction(txn.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_set_dedupes() {
        let peers = PeerSet::new();
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();

        peers.add(addr);
        peers.add(addr);
        assert_eq!(peers.snapshot(), vec![addr]);

        peers.remove(&addr);
        assert!(peers.is_empty());
    }

    #[test]
    fn test_channel_relay_queues_events() {
        let (relay, mut rx) = ChannelRelay::new();

        relay.relay_transaction(&Transaction::create_coinbase("addr", 50, 3));
        match rx.try_recv().unwrap() {
            RelayEvent::Transaction(txn) => assert!(txn.is_coinbase()),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
