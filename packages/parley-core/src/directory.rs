//! # Public Key Directory
//!
//! Where users publish their public key and look up their peers'.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         KEY DIRECTORY                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  publish("alice", pk_a)      get_public_key("alice")                   │
//! │          │                             │                                │
//! │          ▼                             ▼                                │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │ user_id │ public_key │ version │ fingerprint │ published_at     │   │
//! │  │─────────┼────────────┼─────────┼─────────────┼──────────────────│   │
//! │  │ alice   │ pk_a       │ 2       │ 3f9a...     │ 1700000000000    │   │
//! │  │ bob     │ pk_b       │ 1       │ 81c0...     │ 1700000000500    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Publishing a different key bumps `version`; the old entry is kept     │
//! │  so it can still be fetched by version.                                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The directory is untrusted for confidentiality: it only ever sees public
//! keys. A malicious directory can substitute keys, which is what safety
//! numbers exist to detect.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::error::{Error, Result};

/// A public key as published in the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedKey {
    /// Owner of the key
    pub user_id: String,
    /// The key itself (base64 on the wire)
    pub public_key: PublicKey,
    /// Starts at 1, incremented whenever the user publishes a new key
    #[serde(rename = "keyVersion")]
    pub version: u64,
    /// Hex SHA-256 prefix of the key
    #[serde(rename = "keyFingerprint")]
    pub fingerprint: String,
    /// Unix millis
    pub published_at: i64,
}

impl PublishedKey {
    /// Publication time as a UTC datetime
    pub fn published_at_utc(&self) -> Option<DateTime<Utc>> {
        crate::time::from_timestamp_millis(self.published_at)
    }
}

/// Public key lookup and publication
#[async_trait]
pub trait Directory: Send + Sync {
    /// Fetch the current key for `user_id`
    ///
    /// Fails with `PeerKeyNotFound` if the user never published one.
    async fn get_public_key(&self, user_id: &str) -> Result<PublishedKey>;

    /// Fetch a specific, possibly superseded, key version
    async fn get_key_version(&self, user_id: &str, version: u64) -> Result<PublishedKey>;

    /// Publish `public_key` as the current key for `user_id`
    async fn publish(&self, user_id: &str, public_key: &PublicKey) -> Result<PublishedKey>;

    /// Publish a base64-encoded key, validating it first
    async fn publish_base64(&self, user_id: &str, encoded: &str) -> Result<PublishedKey> {
        let public_key = PublicKey::from_base64(encoded)?;
        self.publish(user_id, &public_key).await
    }
}

#[derive(Default)]
struct DirectoryState {
    current: HashMap<String, PublishedKey>,
    previous: HashMap<String, Vec<PublishedKey>>,
}

/// In-process directory
///
/// Used in tests and demos, and as the reference behaviour for remote
/// implementations.
#[derive(Default)]
pub struct MemoryDirectory {
    state: RwLock<DirectoryState>,
    unique_keys: bool,
}

impl MemoryDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to publish a key that another user already holds
    pub fn require_unique_keys(mut self) -> Self {
        self.unique_keys = true;
        self
    }

    /// Number of users with a published key
    pub fn len(&self) -> usize {
        self.state.read().current.len()
    }

    /// Whether nobody has published a key
    pub fn is_empty(&self) -> bool {
        self.state.read().current.is_empty()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn get_public_key(&self, user_id: &str) -> Result<PublishedKey> {
        self.state
            .read()
            .current
            .get(user_id)
            .cloned()
            .ok_or_else(|| Error::PeerKeyNotFound(user_id.to_string()))
    }

    async fn get_key_version(&self, user_id: &str, version: u64) -> Result<PublishedKey> {
        let state = self.state.read();

        if let Some(current) = state.current.get(user_id) {
            if current.version == version {
                return Ok(current.clone());
            }
        }

        state
            .previous
            .get(user_id)
            .and_then(|keys| keys.iter().find(|k| k.version == version))
            .cloned()
            .ok_or_else(|| Error::PeerKeyNotFound(format!("{} (version {})", user_id, version)))
    }

    async fn publish(&self, user_id: &str, public_key: &PublicKey) -> Result<PublishedKey> {
        let mut state = self.state.write();

        if self.unique_keys {
            let taken = state
                .current
                .values()
                .any(|k| k.user_id != user_id && k.public_key == *public_key);
            if taken {
                tracing::warn!(
                    "Rejected publish for {}: key {} belongs to another user",
                    user_id,
                    public_key.short_fingerprint()
                );
                return Err(Error::PublicKeyInUse);
            }
        }

        let version = match state.current.get(user_id) {
            Some(existing) if existing.public_key == *public_key => {
                return Ok(existing.clone());
            }
            Some(existing) => existing.version + 1,
            None => 1,
        };

        let entry = PublishedKey {
            user_id: user_id.to_string(),
            public_key: *public_key,
            version,
            fingerprint: public_key.fingerprint(),
            published_at: crate::time::now_timestamp_millis(),
        };

        if let Some(old) = state.current.insert(user_id.to_string(), entry.clone()) {
            state
                .previous
                .entry(user_id.to_string())
                .or_default()
                .push(old);
        }

        tracing::info!(
            "Published key {} for {} (version {})",
            public_key.short_fingerprint(),
            user_id,
            version
        );

        Ok(entry)
    }
}

// ============================================================================
// TESTS
// ============================================================================
