//! # Parley Core
//!
//! End-to-end encryption for Parley conversations. The server relays and
//! stores only ciphertext; keys never leave the device that generated them.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         PARLEY CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │                      ┌──────────────────────────┐                       │
//! │                      │      SecureSession       │                       │
//! │                      │                          │                       │
//! │                      │ - ensure_key_exchange    │                       │
//! │                      │ - encrypt_outgoing       │                       │
//! │                      │ - decrypt_incoming       │                       │
//! │                      └────┬─────────┬──────┬────┘                       │
//! │                           │         │      │                            │
//! │        ┌──────────────────┘         │      └───────────────┐            │
//! │        ▼                            ▼                      ▼            │
//! │  ┌─────────────┐            ┌──────────────┐       ┌──────────────┐     │
//! │  │  Keystore   │            │    Crypto    │       │  Directory   │     │
//! │  │             │            │              │       │              │     │
//! │  │ - KeyPair   │            │ - X25519     │       │ - publish    │     │
//! │  │ - Conv keys │            │ - HKDF       │       │ - lookup     │     │
//! │  └──────┬──────┘            │ - XSalsa20   │       └──────────────┘     │
//! │         │                   │ - Safety #   │                            │
//! │         ▼                   └──────────────┘       ┌──────────────┐     │
//! │  ┌─────────────┐                                   │  Transport   │     │
//! │  │   Storage   │            ┌──────────────┐       │              │     │
//! │  │             │            │   Message    │       │ - send       │     │
//! │  │ - AES-GCM   │            │ - wire form  │       │ - subscribe  │     │
//! │  │   at rest   │            │ - versions   │       └──────────────┘     │
//! │  └─────────────┘            └──────────────┘                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`config`] - Session configuration
//! - [`crypto`] - Key exchange, key derivation, sealing, safety numbers
//! - [`message`] - Wire format and protocol versions
//! - [`storage`] - Secure local storage for the key pair
//! - [`keystore`] - Key pair persistence and the conversation key cache
//! - [`directory`] - Public key publication and lookup
//! - [`transport`] - Opaque message relay
//! - [`session`] - Per-conversation state machine and the public operations
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use parley_core::{MemoryDirectory, SecureSession, SessionConfig};
//!
//! let directory = Arc::new(MemoryDirectory::new());
//! let alice = SecureSession::open(SessionConfig::default(), "alice", directory.clone()).await?;
//!
//! alice.ensure_key_exchange("conv-1", "bob").await?;
//! let message = alice.encrypt_outgoing("conv-1", "hello bob")?;
//! ```
//!
//! There is no global instance: each logged-in user gets a session, and
//! dropping it (or calling [`SecureSession::logout`]) forgets every
//! conversation key.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod config;
pub mod crypto;
pub mod directory;
pub mod error;
pub mod keystore;
pub mod message;
pub mod session;
pub mod storage;
/// Time helpers.
pub mod time;
pub mod transport;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::SessionConfig;
pub use crypto::{ConversationKey, KeyPair, PublicKey, SafetyNumber, SharedSecret};
pub use directory::{Directory, MemoryDirectory, PublishedKey};
pub use error::{Error, Result};
pub use keystore::{ConversationKeyStore, KeyPairStore};
pub use message::{EncryptedMessage, ProtocolVersion};
pub use session::{ConversationState, FailureReason, SecureSession};
pub use storage::SecureStore;
pub use transport::{IncomingMessage, MemoryRelay, Transport};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of Parley Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Returns build information for debugging
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        protocol: message::CURRENT_VERSION,
        algorithm: crypto::Algorithm::XSalsa20Poly1305.as_str(),
        profile: if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
    }
}

/// Build information for debugging
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Crate version
    pub version: &'static str,
    /// Wire protocol version this build emits
    pub protocol: &'static str,
    /// Message cipher
    pub algorithm: &'static str,
    /// Build profile (debug/release)
    pub profile: &'static str,
}

// ============================================================================
// TESTS
// ============================================================================
