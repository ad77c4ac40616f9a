//! Wire protocol
//!
//! Messages are bincode payloads framed by a magic constant and a
//! little-endian length. One frame per message; request/response pairs
//! share a connection.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::consensus::Block;
use crate::crypto::Hash;
use crate::validation::{OutPoint, Transaction, UnspentTxOut};

/// Frame prefix identifying this network
pub const NETWORK_MAGIC: [u8; 4] = [0x9e, 0x4d, 0x11, 0x37];

/// Upper bound on a frame payload; a full sync chunk of maximum-size
/// blocks must fit.
pub const MAX_MESSAGE_SIZE: u32 = 64 * 1024 * 1024;

/// Wire protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame does not start with the network magic")]
    BadMagic,
    #[error("frame length {len} exceeds the message size limit")]
    Oversize { len: u32 },
    #[error("frame ends before its declared length")]
    Truncated,
    #[error("message encoding error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything peers say to each other
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Request active-chain blocks following a known block
    GetBlocks { from_block_id: Hash },
    /// A chunk of blocks answering `GetBlocks`
    Inv(Vec<Block>),
    /// Request the full UTXO set
    GetUtxos,
    Utxos(Vec<(OutPoint, UnspentTxOut)>),
    /// Request the ids of pending transactions
    GetMempool,
    MempoolIds(Vec<Hash>),
    /// Request the whole active chain
    GetActiveChain,
    ActiveChain(Vec<Block>),
    /// Introduce a peer worth gossiping with
    AddPeer(SocketAddr),
    /// Relay of a single transaction
    Transaction(Transaction),
    /// Relay of a single block
    Block(Block),
}

impl Message {
    /// Serialize into a complete frame
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let payload = bincode::serialize(self)?;
        let mut frame = Vec::with_capacity(8 + payload.len());
        frame.extend_from_slice(&NETWORK_MAGIC);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Parse a complete frame
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < 8 || bytes[..4] != NETWORK_MAGIC {
            return Err(ProtocolError::BadMagic);
        }
        let len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::Oversize { len });
        }
        if bytes.len() - 8 < len as usize {
            return Err(ProtocolError::Truncated);
        }
        Ok(bincode::deserialize(&bytes[8..8 + len as usize])?)
    }

    /// Read one framed message from a stream
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, ProtocolError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).await?;
        if magic != NETWORK_MAGIC {
            return Err(ProtocolError::BadMagic);
        }

        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes).await?;
        let len = u32::from_le_bytes(len_bytes);
        if len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::Oversize { len });
        }

        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).await?;
        Ok(bincode::deserialize(&payload)?)
    }

    /// Write this message as one frame
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<(), ProtocolError> {
        let frame = self.to_bytes()?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }
}
