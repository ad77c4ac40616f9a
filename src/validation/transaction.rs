//! Transaction structures
//!
//! UTXO-model transactions: inputs reference prior outputs by outpoint
//! and unlock them with an ECDSA signature over the spend message.

use serde::{Deserialize, Serialize};

use crate::consensus::TxnError;
use crate::crypto::{sha256d, Hash, PrivateKey, PublicKey, TxSignature};
use crate::params::MAX_MONEY;

/// Reference to one output of one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    /// Id of the transaction containing the output
    pub txid: Hash,
    /// Index of the output in that transaction
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: Hash, index: u32) -> Self {
        Self { txid, index }
    }
}

/// A transaction output: a payment to an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Amount in base units
    pub value: u64,
    /// Address of the recipient
    pub to_addr: String,
}

/// Proof of the right to spend an input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureScript {
    /// Signature over the spend message (arbitrary bytes for coinbase)
    pub unlock_sig: Vec<u8>,
    /// Public key whose address owns the referenced output
    pub unlock_pk: Option<PublicKey>,
}

/// A transaction input spending a prior output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    /// Output being spent; `None` marks a coinbase input
    pub outpoint: Option<OutPoint>,
    /// Unlocking signature and key
    pub signature: SignatureScript,
    /// Sequence number, bound into the spend message
    pub sequence: u32,
}

/// A complete transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub txins: Vec<TxIn>,
    pub txouts: Vec<TxOut>,
    pub locktime: Option<u32>,
}

impl Transaction {
    pub fn new(txins: Vec<TxIn>, txouts: Vec<TxOut>) -> Self {
        Self {
            txins,
            txouts,
            locktime: None,
        }
    }

    /// Create a coinbase transaction paying the block reward.
    ///
    /// The height is folded into the unlock bytes so coinbase ids are
    /// unique across blocks.
    pub fn create_coinbase(pay_to_addr: &str, value: u64, height: u64) -> Self {
        Self {
            txins: vec![TxIn {
                outpoint: None,
                signature: SignatureScript {
                    unlock_sig: height.to_le_bytes().to_vec(),
                    unlock_pk: None,
                },
                sequence: 0,
            }],
            txouts: vec![TxOut {
                value,
                to_addr: pay_to_addr.to_string(),
            }],
            locktime: None,
        }
    }

    /// Transaction identity: double hash of the canonical serialization
    pub fn id(&self) -> Hash {
        let bytes = bincode::serialize(self).expect("transaction serialization is infallible");
        sha256d(&bytes)
    }

    /// A coinbase transaction has a single input with no outpoint
    pub fn is_coinbase(&self) -> bool {
        self.txins.len() == 1 && self.txins[0].outpoint.is_none()
    }

    /// Total value paid out
    pub fn total_output_value(&self) -> u64 {
        self.txouts.iter().map(|o| o.value).sum()
    }

    /// Structural checks that need no chain context
    pub fn validate_basics(&self, as_coinbase: bool) -> Result<(), TxnError> {
        if self.txouts.is_empty() {
            return Err(TxnError::NoOutputs);
        }

        if self.txins.is_empty() && !as_coinbase {
            return Err(TxnError::NoInputs);
        }

        let mut total: u64 = 0;
        for txout in &self.txouts {
            total = total
                .checked_add(txout.value)
                .ok_or(TxnError::ValueOutOfRange)?;
        }

        if total > MAX_MONEY {
            return Err(TxnError::ValueOutOfRange);
        }

        Ok(())
    }
}

/// A spendable output with its provenance
///
/// The confirmation height and coinbase flag drive maturity checks and
/// reorg rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentTxOut {
    pub value: u64,
    pub to_addr: String,
    /// Id of the transaction this output belongs to
    pub txid: Hash,
    /// Index of this output within that transaction
    pub txout_idx: u32,
    pub is_coinbase: bool,
    /// Height of the confirming block (0-based)
    pub height: u64,
}

impl UnspentTxOut {
    pub fn new(txout: &TxOut, txid: Hash, txout_idx: u32, is_coinbase: bool, height: u64) -> Self {
        Self {
            value: txout.value,
            to_addr: txout.to_addr.clone(),
            txid,
            txout_idx,
            is_coinbase,
            height,
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.txout_idx)
    }
}

/// Build the digest an input's signature must cover.
///
/// Commits to the outpoint, the unlocking key, the input's sequence, and
/// the complete output list (SIGHASH_ALL-style).
pub fn build_spend_message(
    outpoint: &OutPoint,
    pubkey: &PublicKey,
    sequence: u32,
    txouts: &[TxOut],
) -> Hash {
    let payload = bincode::serialize(&(outpoint, &pubkey.0[..], sequence, txouts))
        .expect("spend message serialization is infallible");
    sha256d(&payload)
}

/// Construct an authorized input spending `outpoint` for a transaction
/// paying `txouts`.
pub fn make_txin(key: &PrivateKey, outpoint: OutPoint, txouts: &[TxOut], sequence: u32) -> TxIn {
    let pubkey = key.public_key();
    let message = build_spend_message(&outpoint, &pubkey, sequence, txouts);
    let signature = key.sign(&message);

    TxIn {
        outpoint: Some(outpoint),
        signature: SignatureScript {
            unlock_sig: signature.0.to_vec(),
            unlock_pk: Some(pubkey),
        },
        sequence,
    }
}

/// Parse an input's unlock bytes as a fixed-width signature
pub fn unlock_signature(txin: &TxIn) -> Option<TxSignature> {
    let bytes: [u8; 64] = txin.signature.unlock_sig.as_slice().try_into().ok()?;
    Some(TxSignature(bytes))
}
