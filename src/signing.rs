//! Pluggable signing seam.
//!
//! The transaction pipeline never touches private keys. It hands a signer a
//! key id plus a 32-byte digest and gets back a raw compact signature; DER
//! encoding and sighash-flag placement stay on the caller's side. Any
//! custodial backend that can produce compressed public keys and compact
//! ECDSA signatures slots in behind this trait. `MemorySigningService` is
//! the in-process implementation used for development and tests.

use std::collections::HashMap;

use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::CompressedPublicKey;
use zeroize::Zeroize;

use crate::error::{Result, WalletError};
use crate::model::Network;

pub trait SigningService {
    /// Generate a fresh keypair and return its opaque key id.
    fn create_key(&mut self) -> Result<String>;

    /// 33-byte compressed public key, hex-encoded.
    fn public_key(&self, key_id: &str) -> Result<String>;

    /// Sign a 32-byte digest; returns the 64-byte compact signature as hex.
    fn sign(&self, key_id: &str, digest: &[u8; 32]) -> Result<String>;
}

/// Segwit v0 address for a compressed public key.
pub fn p2wpkh_address(public_key_hex: &str, network: Network) -> Result<String> {
    let address =
        bitcoin::Address::p2wpkh(&parse_compressed(public_key_hex)?, bitcoin::Network::from(network));
    Ok(address.to_string())
}

/// Legacy base58 address for a compressed public key.
pub fn p2pkh_address(public_key_hex: &str, network: Network) -> Result<String> {
    let compressed = parse_compressed(public_key_hex)?;
    let address = bitcoin::Address::p2pkh(compressed, bitcoin::Network::from(network));
    Ok(address.to_string())
}

fn parse_compressed(public_key_hex: &str) -> Result<CompressedPublicKey> {
    public_key_hex
        .parse::<CompressedPublicKey>()
        .map_err(|e| WalletError::Encoding(format!("bad public key hex: {}", e)))
}

/// Keys held in process memory, addressed by random UUIDs. Secret material
/// is wiped from intermediate buffers on import and export.
#[derive(Default)]
pub struct MemorySigningService {
    secp: Secp256k1<bitcoin::secp256k1::All>,
    keys: HashMap<String, SecretKey>,
}

impl MemorySigningService {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::new(),
            keys: HashMap::new(),
        }
    }

    /// Rebuild a service from `(key_id, secret_hex)` pairs, the exact shape
    /// `export_keys` produces.
    pub fn from_entries(entries: &[(String, String)]) -> Result<Self> {
        let mut service = Self::new();
        for (key_id, secret_hex) in entries {
            let mut raw = hex::decode(secret_hex)
                .map_err(|e| WalletError::Encoding(format!("bad secret hex: {}", e)))?;
            let secret = SecretKey::from_slice(&raw)
                .map_err(|e| WalletError::Encoding(format!("bad secret key: {}", e)))?;
            raw.zeroize();
            service.keys.insert(key_id.clone(), secret);
        }
        Ok(service)
    }

    /// Dump every key as `(key_id, secret_hex)`. Round-trips through
    /// `from_entries` without loss.
    pub fn export_keys(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .keys
            .iter()
            .map(|(key_id, secret)| {
                let mut raw = secret.secret_bytes();
                let encoded = hex::encode(raw);
                raw.zeroize();
                (key_id.clone(), encoded)
            })
            .collect();
        entries.sort();
        entries
    }

    fn key(&self, key_id: &str) -> Result<&SecretKey> {
        self.keys
            .get(key_id)
            .ok_or_else(|| WalletError::KeyNotFound(key_id.to_string()))
    }
}

impl SigningService for MemorySigningService {
    fn create_key(&mut self) -> Result<String> {
        let secret = SecretKey::new(&mut rand::thread_rng());
        let key_id = uuid::Uuid::new_v4().to_string();
        self.keys.insert(key_id.clone(), secret);
        log::debug!("Created signing key {}", key_id);
        Ok(key_id)
    }

    fn public_key(&self, key_id: &str) -> Result<String> {
        let secret = self.key(key_id)?;
        let public = secret.public_key(&self.secp);
        Ok(hex::encode(public.serialize()))
    }

    fn sign(&self, key_id: &str, digest: &[u8; 32]) -> Result<String> {
        let secret = self.key(key_id)?;
        let message = Message::from_digest(*digest);
        let signature = self.secp.sign_ecdsa(&message, secret);
        Ok(hex::encode(signature.serialize_compact()))
    }
}
