//! # Key Derivation Functions
//!
//! Turns an X25519 shared secret into a per-conversation symmetric key.
//!
//! ## Shared Secret Key Derivation
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 SHARED SECRET → CONVERSATION KEY                        │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    X25519 SHARED SECRET                         │   │
//! │  │                                                                 │   │
//! │  │  alice_private × bob_public = bob_private × alice_public       │   │
//! │  │                                                                 │   │
//! │  │  → 32 bytes                                                    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │                                ▼                                        │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    HKDF KEY DERIVATION                          │   │
//! │  │                                                                 │   │
//! │  │  HKDF-SHA256(                                                  │   │
//! │  │    ikm  = shared_secret,                                      │   │
//! │  │    salt = "parley-conversation-salt-v1",                      │   │
//! │  │    info = "parley-conversation-key-v1" || conversation_id     │   │
//! │  │  )                                                            │   │
//! │  │                                                                 │   │
//! │  │  → 32-byte XSalsa20-Poly1305 key                              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  The same two parties may share several conversations (a direct       │
//! │  chat and a group, say). Binding the conversation id into `info`      │
//! │  gives each of them an independent key.                               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Considerations
//!
//! | Aspect | Design Choice |
//! |--------|---------------|
//! | KDF Algorithm | HKDF-SHA256 (extract-and-expand) |
//! | Key Separation | Fixed salt and `info` prefix per purpose |
//! | Conversation Binding | conversation id appended to `info` |
//! | Version String | "-v1" suffix |

use std::fmt;

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use super::exchange::SharedSecret;
use super::KEY_SIZE;
use crate::error::{Error, Result};

/// Domain separation strings for HKDF
pub mod domain {
    /// Salt for the extract step of conversation key derivation
    pub const CONVERSATION_SALT: &[u8] = b"parley-conversation-salt-v1";

    /// `info` prefix for conversation keys
    pub const CONVERSATION_KEY: &[u8] = b"parley-conversation-key-v1";
}

/// Symmetric key for one conversation
///
/// Zeroized when dropped. Never transmitted: every participant derives it
/// independently.
#[derive(ZeroizeOnDrop)]
pub struct ConversationKey([u8; KEY_SIZE]);

impl ConversationKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, checking the length
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| Error::InvalidKeyLength {
            what: "conversation key",
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl PartialEq for ConversationKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for ConversationKey {}

impl fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConversationKey(<redacted>)")
    }
}

/// Derive the conversation key from a shared secret
///
/// Deterministic per `(shared_secret, conversation_id)`, so both
/// participants arrive at the same key without sending it.
pub fn derive_conversation_key(
    shared_secret: &SharedSecret,
    conversation_id: &str,
) -> Result<ConversationKey> {
    if conversation_id.is_empty() {
        return Err(Error::KeyDerivationFailed(
            "conversation id must not be empty".into(),
        ));
    }

    let hkdf = Hkdf::<Sha256>::new(Some(domain::CONVERSATION_SALT), shared_secret.as_bytes());

    let mut key = [0u8; KEY_SIZE];
    hkdf.expand_multi_info(
        &[domain::CONVERSATION_KEY, conversation_id.as_bytes()],
        &mut key,
    )
    .map_err(|_| Error::KeyDerivationFailed("Failed to derive conversation key".into()))?;

    Ok(ConversationKey(key))
}

// ============================================================================
// TESTS
// ============================================================================
