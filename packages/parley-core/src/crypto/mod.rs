//! # Cryptography Module
//!
//! This module provides all cryptographic primitives used by Parley Core.
//!
//! ## Security Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CRYPTOGRAPHIC ARCHITECTURE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    KEY HIERARCHY                                │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  Device Key Pair (X25519, generated once per device)           │   │
//! │  │      │                                                          │   │
//! │  │      │  × peer public key (fetched from the directory)         │   │
//! │  │      ▼                                                          │   │
//! │  │  Shared Secret (32 bytes, transient)                           │   │
//! │  │      │                                                          │   │
//! │  │      │  HKDF-SHA256(info = ... || conversation_id)             │   │
//! │  │      ▼                                                          │   │
//! │  │  Conversation Key (32 bytes, cached per conversation)          │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 ENCRYPTION SCHEME                               │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  Message Encryption (XSalsa20-Poly1305)                        │   │
//! │  │  • 256-bit key                                                 │   │
//! │  │  • 192-bit nonce (random per message)                          │   │
//! │  │  • 128-bit authentication tag                                  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 VERIFICATION                                    │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  Safety Number: SHA-512 over both public keys and the          │   │
//! │  │  conversation id, shown as 60 digits for out-of-band checks    │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Cryptographic Libraries
//!
//! | Purpose | Library | Algorithm |
//! |---------|---------|-----------|
//! | Key Exchange | x25519-dalek | X25519 ECDH |
//! | Message Encryption | crypto_secretbox | XSalsa20-Poly1305 |
//! | Storage Encryption | aes-gcm | AES-256-GCM |
//! | Key Derivation | hkdf | HKDF-SHA256 |
//! | Safety Numbers | sha2 | SHA-512 |
//! | Random | rand | OS CSPRNG |
//!
//! ## Security Considerations
//!
//! 1. **Key Zeroization**: Private keys, shared secrets and conversation
//!    keys are zeroized on drop using the `zeroize` crate.
//!
//! 2. **Nonce Generation**: Every message gets a fresh random 24-byte nonce.
//!
//! 3. **Low-order Points**: Peer keys that yield an all-zero shared secret
//!    are refused.

mod cipher;
mod exchange;
mod kdf;
mod keys;
mod safety;

pub use cipher::{decrypt, decrypt_message, encrypt, seal, Algorithm, Nonce, NONCE_SIZE, TAG_SIZE};
pub use exchange::{compute_shared_secret, SharedSecret};
pub use kdf::{derive_conversation_key, domain, ConversationKey};
pub use keys::{KeyPair, KeyPairRecord, PublicKey, KEY_ALGORITHM, KEY_RECORD_VERSION};
pub use safety::{SafetyNumber, SAFETY_NUMBER_DIGITS};

/// Size of every key in bytes (X25519 and the symmetric conversation key)
pub const KEY_SIZE: usize = 32;
