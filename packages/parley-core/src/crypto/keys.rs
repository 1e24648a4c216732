//! # Key Management
//!
//! Long-term device key pairs and the public keys peers look up in the
//! directory.
//!
//! ## Key Types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          KEY TYPES                                      │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  KeyPair (X25519 / Curve25519)                                  │   │
//! │  │  ─────────────────────────────                                   │   │
//! │  │                                                                  │   │
//! │  │  Purpose:                                                       │   │
//! │  │  • Key exchange with peers (ECDH)                               │   │
//! │  │  • Deriving per-conversation keys                               │   │
//! │  │                                                                  │   │
//! │  │  Format:                                                        │   │
//! │  │  • Private key: 32 bytes (never leaves the device)             │   │
//! │  │  • Public key: 32 bytes (published to the directory)           │   │
//! │  │  • Created at: unix millis                                     │   │
//! │  │                                                                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  KeyPairRecord (persisted form)                                 │   │
//! │  │  ──────────────────────────────                                  │   │
//! │  │                                                                  │   │
//! │  │  {                                                              │   │
//! │  │    "privateKey": "<base64>",                                    │   │
//! │  │    "publicKey":  "<base64>",                                    │   │
//! │  │    "algorithm":  "Curve25519",                                  │   │
//! │  │    "createdAt":  1700000000000,                                 │   │
//! │  │    "version":    "2.0"                                          │   │
//! │  │  }                                                              │   │
//! │  │                                                                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::exchange::{diffie_hellman, SharedSecret};
use super::KEY_SIZE;
use crate::error::{Error, Result};

/// Algorithm name recorded alongside persisted key pairs
pub const KEY_ALGORITHM: &str = "Curve25519";

/// Version of the persisted key pair record
pub const KEY_RECORD_VERSION: &str = "2.0";

/// Length of a base64-encoded 32-byte key (with padding)
const BASE64_KEY_LEN: usize = 44;

/// A device's long-term X25519 key pair
///
/// ## Security
///
/// - The private key is zeroized when this struct is dropped
/// - The private key must never be transmitted or logged
/// - Created once and never mutated; rotation replaces it wholesale
#[derive(ZeroizeOnDrop)]
pub struct KeyPair {
    /// Private key (secret)
    #[zeroize(skip)] // x25519_dalek handles its own zeroization
    secret: StaticSecret,
    /// Public key (derived from secret)
    public: X25519PublicKey,
    /// Creation time in unix milliseconds
    created_at: i64,
}

impl KeyPair {
    /// Generate a new random key pair
    ///
    /// Draws the private key from the operating system's CSPRNG. Fails with
    /// `RngFailed` instead of falling back to a weaker source.
    pub fn generate() -> Result<Self> {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng
            .try_fill_bytes(&mut bytes[..])
            .map_err(|_| Error::RngFailed)?;

        let pair = Self::from_secret_array(*bytes, crate::time::now_timestamp_millis());
        tracing::debug!("Generated key pair {}", pair.public_key().short_fingerprint());
        Ok(pair)
    }

    /// Rebuild a key pair from raw private key bytes
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secret: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| Error::InvalidKeyLength {
            what: "private key",
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        let secret = Zeroizing::new(secret);
        Ok(Self::from_secret_array(*secret, crate::time::now_timestamp_millis()))
    }

    fn from_secret_array(bytes: [u8; KEY_SIZE], created_at: i64) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = X25519PublicKey::from(&secret);
        Self {
            secret,
            public,
            created_at,
        }
    }

    /// Get the public half for publishing
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.public.to_bytes())
    }

    /// Get the secret key bytes (for storage)
    ///
    /// ## Security Warning
    ///
    /// Only use this for secure storage. Never log or transmit these bytes.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Creation time in unix milliseconds
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Perform Diffie-Hellman with a peer's public key
    ///
    /// Both parties compute the same value:
    /// - Alice: alice_secret × bob_public
    /// - Bob: bob_secret × alice_public
    pub fn diffie_hellman(&self, their_public: &PublicKey) -> Result<SharedSecret> {
        diffie_hellman(&self.secret, their_public)
    }

    /// Convert into the persisted record form
    pub fn to_record(&self) -> KeyPairRecord {
        let secret = self.secret_bytes();
        KeyPairRecord {
            private_key: BASE64.encode(&secret[..]),
            public_key: self.public_key().to_base64(),
            algorithm: KEY_ALGORITHM.to_string(),
            created_at: self.created_at,
            version: KEY_RECORD_VERSION.to_string(),
        }
    }

    /// Restore from a persisted record
    ///
    /// Rejects records whose public key does not match the private key.
    pub fn from_record(record: &KeyPairRecord) -> Result<Self> {
        if record.algorithm != KEY_ALGORITHM {
            return Err(Error::StorageCorrupted(format!(
                "unexpected key algorithm '{}'",
                record.algorithm
            )));
        }

        let secret = Zeroizing::new(
            BASE64
                .decode(&record.private_key)
                .map_err(|e| Error::StorageCorrupted(format!("private key is not base64: {}", e)))?,
        );
        let secret: [u8; KEY_SIZE] = secret
            .as_slice()
            .try_into()
            .map_err(|_| Error::StorageCorrupted("private key has wrong length".into()))?;
        let secret = Zeroizing::new(secret);

        let pair = Self::from_secret_array(*secret, record.created_at);
        let stored_public = PublicKey::from_base64(&record.public_key)
            .map_err(|e| Error::StorageCorrupted(format!("public key: {}", e)))?;

        if pair.public_key() != stored_public {
            return Err(Error::StorageCorrupted(
                "public key does not match private key".into(),
            ));
        }

        Ok(pair)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_key())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Persisted key pair record
///
/// Field names follow the record the web client keeps in local storage.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct KeyPairRecord {
    /// Base64 private key
    pub private_key: String,
    /// Base64 public key
    pub public_key: String,
    /// Always `Curve25519`
    pub algorithm: String,
    /// Creation time in unix milliseconds
    pub created_at: i64,
    /// Record version
    pub version: String,
}

/// An X25519 public key, safe to share with anyone
///
/// Serializes as standard padded base64 (44 characters).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, checking the length
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| Error::InvalidKeyLength {
            what: "public key",
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Decode from base64
    ///
    /// The encoded form must be exactly 44 characters and decode to 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        if encoded.len() != BASE64_KEY_LEN {
            return Err(Error::InvalidKey(format!(
                "public key must be {} base64 characters, got {}",
                BASE64_KEY_LEN,
                encoded.len()
            )));
        }

        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| Error::InvalidKey(format!("invalid base64: {}", e)))?;

        Self::from_slice(&bytes)
    }

    /// Encode as base64
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Fingerprint stored next to a published key
    ///
    /// Hex of the first 16 bytes of SHA-256 over the key.
    pub fn fingerprint(&self) -> String {
        let hash = Sha256::digest(self.0);
        hex::encode(&hash[..16])
    }

    /// First 8 hex characters of the fingerprint, for log lines
    pub fn short_fingerprint(&self) -> String {
        let mut fp = self.fingerprint();
        fp.truncate(8);
        fp
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.short_fingerprint())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        PublicKey::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// TESTS
// ============================================================================
