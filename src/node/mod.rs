//! Node orchestration
//!
//! Wires the chain state, miner, peer server, and persistence into one
//! running process. All chain access goes through a single mutex; the
//! miner's proof search runs on the blocking pool so the lock is never
//! held while hashing.

mod genesis;

pub use genesis::*;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::mining::Miner;
use crate::p2p::{request, send_to_peer, ChannelRelay, Message, PeerSet, ProtocolError, RelayEvent};
use crate::storage::{ChainState, ChainStore, StoreError};
use crate::wallet::{Wallet, WalletError};

/// Node startup errors
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runtime configuration, read from the environment
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen_port: u16,
    pub peers: Vec<SocketAddr>,
    pub data_dir: PathBuf,
    pub wallet_path: PathBuf,
}

impl NodeConfig {
    /// Build a config from `MINICHAIN_PORT`, `MINICHAIN_PEERS` (comma
    /// separated addresses), `MINICHAIN_DATA_DIR`, and
    /// `MINICHAIN_WALLET`.
    pub fn from_env() -> Self {
        let listen_port = std::env::var("MINICHAIN_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(9999);

        let peers = std::env::var("MINICHAIN_PEERS")
            .unwrap_or_default()
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();

        let data_dir = std::env::var("MINICHAIN_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("minichain_data"));

        let wallet_path = std::env::var("MINICHAIN_WALLET")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("wallet.dat"));

        Self {
            listen_port,
            peers,
            data_dir,
            wallet_path,
        }
    }
}

type SharedChain = Arc<Mutex<ChainState>>;

fn lock(chain: &SharedChain) -> MutexGuard<'_, ChainState> {
    chain.lock().expect("chain lock poisoned")
}

/// Run a node until the process is stopped.
pub async fn run(config: NodeConfig) -> Result<(), NodeError> {
    let wallet = Wallet::load_or_create(&config.wallet_path)?;
    info!(address = wallet.address(), "wallet loaded");

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(ChainStore::open(config.data_dir.join("chain.db"))?);

    let mut chain = ChainState::new(create_genesis_block());
    // Stored blocks are replayed through full validation, never trusted.
    for block in store.load_chain()? {
        chain.connect_block(block, false);
    }
    info!(height = chain.height(), "chain initialized");

    let (relay, relay_rx) = ChannelRelay::new();
    chain.set_relay(Box::new(relay));

    let chain: SharedChain = Arc::new(Mutex::new(chain));
    let peers = PeerSet::new();
    for addr in &config.peers {
        peers.add(*addr);
    }

    tokio::spawn(relay_loop(relay_rx, peers.clone()));

    let listener = TcpListener::bind(("0.0.0.0", config.listen_port)).await?;
    info!(port = config.listen_port, "listening for peers");
    tokio::spawn(accept_loop(
        listener,
        chain.clone(),
        peers.clone(),
        store.clone(),
    ));

    sync_with_peers(&chain, &peers).await;

    miner_loop(chain, store, wallet.address().to_string()).await
}

/// Drain relay events from the chain state and fan them out to peers.
async fn relay_loop(mut rx: UnboundedReceiver<RelayEvent>, peers: PeerSet) {
    while let Some(event) = rx.recv().await {
        let message = match event {
            RelayEvent::Block(block) => Message::Block(block),
            RelayEvent::Transaction(txn) => Message::Transaction(txn),
        };
        for addr in peers.snapshot() {
            send_to_peer(&peers, addr, &message).await;
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    chain: SharedChain,
    peers: PeerSet,
    store: Arc<ChainStore>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(%addr, "peer connected");
                tokio::spawn(handle_connection(
                    stream,
                    chain.clone(),
                    peers.clone(),
                    store.clone(),
                ));
            }
            Err(err) => warn!(%err, "accept failed"),
        }
    }
}

/// Serve one peer connection: read frames, dispatch, reply in place.
async fn handle_connection(
    mut stream: TcpStream,
    chain: SharedChain,
    peers: PeerSet,
    store: Arc<ChainStore>,
) {
    loop {
        let message = match Message::read_from(&mut stream).await {
            Ok(message) => message,
            Err(ProtocolError::Io(_)) => return,
            Err(err) => {
                debug!(%err, "dropping misbehaving connection");
                return;
            }
        };

        if let Some(reply) = dispatch(message, &chain, &peers, &store) {
            if let Err(err) = reply.write_to(&mut stream).await {
                debug!(%err, "reply failed");
                return;
            }
        }
    }
}

fn dispatch(
    message: Message,
    chain: &SharedChain,
    peers: &PeerSet,
    store: &Arc<ChainStore>,
) -> Option<Message> {
    match message {
        Message::GetBlocks { from_block_id } => {
            Some(Message::Inv(lock(chain).blocks_since(&from_block_id)))
        }
        Message::Inv(blocks) => {
            let mut guard = lock(chain);
            for block in blocks {
                guard.connect_block(block, false);
            }
            None
        }
        Message::GetUtxos => Some(Message::Utxos(lock(chain).utxo().snapshot())),
        Message::GetMempool => Some(Message::MempoolIds(lock(chain).mempool().ids())),
        Message::GetActiveChain => {
            Some(Message::ActiveChain(lock(chain).active_chain().to_vec()))
        }
        Message::AddPeer(addr) => {
            peers.add(addr);
            None
        }
        Message::Transaction(txn) => {
            lock(chain).accept_transaction(txn);
            None
        }
        Message::Block(block) => {
            let mut guard = lock(chain);
            if guard.connect_block(block, false).is_some() {
                if let Err(err) = store.save_chain(guard.active_chain()) {
                    warn!(%err, "failed to persist chain");
                }
            }
            None
        }
        // Reply-only variants arriving unsolicited are ignored.
        Message::Utxos(_) | Message::MempoolIds(_) | Message::ActiveChain(_) => None,
    }
}

/// Initial block download: keep asking peers for blocks past our tip
/// until nobody has anything new.
async fn sync_with_peers(chain: &SharedChain, peers: &PeerSet) {
    loop {
        let tip_id = match lock(chain).tip() {
            Some(tip) => tip.id(),
            None => return,
        };

        let mut got_new = false;
        for addr in peers.snapshot() {
            match request(addr, &Message::GetBlocks { from_block_id: tip_id }).await {
                Ok(Message::Inv(blocks)) if !blocks.is_empty() => {
                    info!(%addr, count = blocks.len(), "received blocks");
                    let mut guard = lock(chain);
                    for block in blocks {
                        if guard.connect_block(block, false).is_some() {
                            got_new = true;
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => debug!(%addr, %err, "sync request failed"),
            }
        }

        if !got_new {
            info!(height = lock(chain).height(), "initial block download complete");
            return;
        }
    }
}

/// Assemble, mine, connect, persist, forever.
async fn miner_loop(
    chain: SharedChain,
    store: Arc<ChainStore>,
    reward_addr: String,
) -> Result<(), NodeError> {
    let interrupt = lock(&chain).mine_interrupt();
    let miner = Miner::new(reward_addr, interrupt);

    loop {
        let candidate = {
            let guard = lock(&chain);
            miner.assemble_block(&guard, None)
        };
        let block = match candidate {
            Ok(block) => block,
            Err(err) => {
                warn!(%err, "failed to assemble a candidate block");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let worker = miner.clone();
        let mined = tokio::task::spawn_blocking(move || worker.mine(block))
            .await
            .expect("mining task panicked");

        if let Some(block) = mined {
            let mut guard = lock(&chain);
            if guard.connect_block(block, false).is_some() {
                if let Err(err) = store.save_chain(guard.active_chain()) {
                    warn!(%err, "failed to persist chain");
                }
            }
        }
    }
}
