//! ECDSA keys over secp256k1
//!
//! Spend authorization: an input carries the spender's public key and an
//! ECDSA signature over the transaction's spend message. Addresses are
//! base58check-encoded digests of the public key.

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{sha256d, Hash};

/// Version byte prepended to address payloads
const ADDRESS_VERSION: u8 = 0x00;

/// Key and signature errors
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid private key")]
    InvalidPrivateKey,
}

/// Signing key for spend authorization
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

/// 33-byte SEC1-compressed public key
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "pubkey_serde")] pub [u8; 33]);

/// 64-byte fixed-width ECDSA signature
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSignature(#[serde(with = "sig_serde")] pub [u8; 64]);

mod pubkey_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 33], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 33], D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        if bytes.len() != 33 {
            return Err(serde::de::Error::custom("invalid public key length"));
        }
        let mut arr = [0u8; 33];
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }
}

mod sig_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        if bytes.len() != 64 {
            return Err(serde::de::Error::custom("invalid signature length"));
        }
        let mut arr = [0u8; 64];
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        PrivateKey(SigningKey::random(&mut OsRng))
    }

    /// Create from 32 bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, KeyError> {
        SigningKey::from_bytes(bytes.into())
            .map(PrivateKey)
            .map_err(|_| KeyError::InvalidPrivateKey)
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> PublicKey {
        let point = self.0.verifying_key().to_encoded_point(true);
        let mut arr = [0u8; 33];
        arr.copy_from_slice(point.as_bytes());
        PublicKey(arr)
    }

    /// Sign a spend message
    pub fn sign(&self, message: &Hash) -> TxSignature {
        let signature: Signature = self.0.sign(&message.0);
        let mut arr = [0u8; 64];
        arr.copy_from_slice(&signature.to_bytes());
        TxSignature(arr)
    }

    /// Export to bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes().into()
    }
}

impl PublicKey {
    /// Create from 33 SEC1-compressed bytes
    pub fn from_bytes(bytes: &[u8; 33]) -> Result<Self, KeyError> {
        VerifyingKey::from_sec1_bytes(bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(PublicKey(*bytes))
    }

    /// Verify a signature over a spend message
    pub fn verify(&self, message: &Hash, signature: &TxSignature) -> bool {
        let verifying_key = match VerifyingKey::from_sec1_bytes(&self.0) {
            Ok(vk) => vk,
            Err(_) => return false,
        };

        let sig = match Signature::from_slice(&signature.0) {
            Ok(s) => s,
            Err(_) => return false,
        };

        verifying_key.verify(&message.0, &sig).is_ok()
    }

    /// Derive the payment address for this key
    pub fn to_address(&self) -> String {
        pubkey_to_address(&self.0)
    }

    /// Export to bytes
    pub fn to_bytes(&self) -> [u8; 33] {
        self.0
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl std::fmt::Debug for TxSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

/// Derive an address from raw public key bytes
///
/// Address = Base58(version + sha256d(pubkey)[0:20] + checksum[0:4])
pub fn pubkey_to_address(pubkey: &[u8]) -> String {
    let digest = sha256d(pubkey);

    let mut payload = Vec::with_capacity(25);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(&digest.0[..20]);

    let checksum = sha256d(&payload);
    payload.extend_from_slice(&checksum.0[..4]);

    bs58::encode(payload).into_string()
}

/// Decode an address, verifying its checksum
pub fn address_is_valid(address: &str) -> bool {
    let decoded = match bs58::decode(address).into_vec() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    if decoded.len() != 25 || decoded[0] != ADDRESS_VERSION {
        return false;
    }

    let checksum = sha256d(&decoded[..21]);
    decoded[21..] == checksum.0[..4]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let private = PrivateKey::generate();
        let public = private.public_key();
        assert!(public.0[0] == 0x02 || public.0[0] == 0x03);
    }

    #[test]
    fn test_sign_verify() {
        let private = PrivateKey::generate();
        let public = private.public_key();

        let message = sha256d(b"test message");
        let signature = private.sign(&message);

        assert!(public.verify(&message, &signature));
    }

    #[test]
    fn test_wrong_key_fails() {
        let private1 = PrivateKey::generate();
        let public2 = PrivateKey::generate().public_key();

        let message = sha256d(b"test message");
        let signature = private1.sign(&message);

        assert!(!public2.verify(&message, &signature));
    }

    #[test]
    fn test_wrong_message_fails() {
        let private = PrivateKey::generate();
        let public = private.public_key();

        let signature = private.sign(&sha256d(b"message 1"));
        assert!(!public.verify(&sha256d(b"message 2"), &signature));
    }

    #[test]
    fn test_key_roundtrip() {
        let private = PrivateKey::generate();
        let recovered = PrivateKey::from_bytes(&private.to_bytes()).unwrap();
        assert_eq!(private.public_key(), recovered.public_key());
    }

    #[test]
    fn test_address_checksum() {
        let address = PrivateKey::generate().public_key().to_address();
        assert!(address_is_valid(&address));
        assert!(!address_is_valid("garbage"));
    }

    #[test]
    fn test_address_deterministic() {
        let public = PrivateKey::generate().public_key();
        assert_eq!(public.to_address(), public.to_address());
    }
}
