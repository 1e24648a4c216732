//! # Key Exchange
//!
//! X25519 Diffie-Hellman between a local private key and a peer's
//! published public key.
//!
//! ```text
//!   Alice                              Bob
//!     │                                  │
//!     │──── Alice's Public Key ─────────►│   (via the directory)
//!     │◄──── Bob's Public Key ───────────│
//!     ▼                                  ▼
//!  alice_private × bob_public  ==  bob_private × alice_public
//!                   │
//!                   ▼
//!           SharedSecret (32 bytes, never transmitted, never persisted)
//! ```

use std::fmt;

use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use super::kdf::{derive_conversation_key, ConversationKey};
use super::keys::PublicKey;
use super::KEY_SIZE;
use crate::error::{Error, Result};

/// Output of X25519 between one party's private key and the other's
/// public key
///
/// Transient: not `Clone`, not serializable, zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct SharedSecret([u8; KEY_SIZE]);

impl SharedSecret {
    /// Get the raw bytes (for key derivation)
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Derive the conversation key bound to `conversation_id`
    pub fn derive_conversation_key(&self, conversation_id: &str) -> Result<ConversationKey> {
        derive_conversation_key(self, conversation_id)
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

/// Compute the shared secret from raw key material
///
/// Both inputs must be exactly 32 bytes, otherwise `InvalidKeyLength`.
/// Deterministic and commutative across the two parties.
pub fn compute_shared_secret(
    local_private_key: &[u8],
    peer_public_key: &[u8],
) -> Result<SharedSecret> {
    let private: [u8; KEY_SIZE] =
        local_private_key
            .try_into()
            .map_err(|_| Error::InvalidKeyLength {
                what: "private key",
                expected: KEY_SIZE,
                actual: local_private_key.len(),
            })?;
    let private = Zeroizing::new(private);
    let peer = PublicKey::from_slice(peer_public_key)?;

    let secret = StaticSecret::from(*private);
    diffie_hellman(&secret, &peer)
}

/// Scalar multiplication with a rejection of non-contributory results
///
/// A low-order peer point forces the output to all zeros regardless of our
/// private key, so such keys are refused.
pub(crate) fn diffie_hellman(secret: &StaticSecret, peer: &PublicKey) -> Result<SharedSecret> {
    let their_public = X25519PublicKey::from(*peer.as_bytes());
    let shared = secret.diffie_hellman(&their_public);

    if !shared.was_contributory() {
        tracing::warn!("Rejected low-order public key {}", peer.short_fingerprint());
        return Err(Error::KeyExchangeFailed(
            "peer public key is a low-order point".into(),
        ));
    }

    Ok(SharedSecret(shared.to_bytes()))
}

// ============================================================================
// TESTS
// ============================================================================
