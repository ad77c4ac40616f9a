//! Wallet
//!
//! A single keypair persisted as 32 raw secret bytes. The wallet signs
//! spends and derives the address block rewards are paid to.

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::crypto::{KeyError, PrivateKey, PublicKey};
use crate::validation::{make_txin, OutPoint, Transaction, TxOut, UnspentTxOut};

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wallet key error: {0}")]
    Key(#[from] KeyError),
    #[error("wallet file is not a 32-byte secret key")]
    MalformedKeyFile,
}

/// A single-key wallet
pub struct Wallet {
    key: PrivateKey,
    address: String,
}

impl Wallet {
    /// Load the wallet at `path`, generating and persisting a fresh key
    /// if the file does not exist.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        let path = path.as_ref();
        let key = if path.exists() {
            let bytes = fs::read(path)?;
            let secret: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| WalletError::MalformedKeyFile)?;
            PrivateKey::from_bytes(&secret)?
        } else {
            let key = PrivateKey::generate();
            fs::write(path, key.to_bytes())?;
            info!(path = %path.display(), "generated new wallet");
            key
        };

        let address = key.public_key().to_address();
        Ok(Self { key, address })
    }

    pub fn key(&self) -> &PrivateKey {
        &self.key
    }

    pub fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sum of unspent outputs paying this wallet
    pub fn balance(&self, utxos: &[(OutPoint, UnspentTxOut)]) -> u64 {
        utxos
            .iter()
            .filter(|(_, utxo)| utxo.to_addr == self.address)
            .map(|(_, utxo)| utxo.value)
            .sum()
    }

    /// Build a transaction paying `value` to `to_addr`.
    ///
    /// Picks this wallet's smallest outputs until the target is covered;
    /// anything selected beyond the target becomes the miner's fee.
    /// Returns `None` if the spendable balance is insufficient.
    pub fn build_payment(
        &self,
        utxos: &[(OutPoint, UnspentTxOut)],
        to_addr: &str,
        value: u64,
    ) -> Option<Transaction> {
        let mut mine: Vec<&UnspentTxOut> = utxos
            .iter()
            .filter(|(_, utxo)| utxo.to_addr == self.address)
            .map(|(_, utxo)| utxo)
            .collect();
        mine.sort_by_key(|utxo| utxo.value);

        let mut selected = Vec::new();
        let mut total: u64 = 0;
        for utxo in mine {
            selected.push(utxo);
            total = total.saturating_add(utxo.value);
            if total >= value {
                break;
            }
        }
        if total < value {
            return None;
        }

        let txouts = vec![TxOut {
            value,
            to_addr: to_addr.to_string(),
        }];
        let txins = selected
            .into_iter()
            .map(|utxo| make_txin(&self.key, utxo.outpoint(), &txouts, 0))
            .collect();

        Some(Transaction::new(txins, txouts))
    }
}
