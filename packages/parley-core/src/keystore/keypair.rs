//! Persistence of the device key pair.
//!
//! The pair is stored as a [`KeyPairRecord`] JSON document under
//! `parley.keypair.<user_id>`. Persisting overwrites: rotating the key
//! makes every conversation key derived from the old pair unrecoverable.

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::crypto::{KeyPair, KeyPairRecord};
use crate::directory::{Directory, PublishedKey};
use crate::error::{Error, Result};
use crate::storage::{keys, SecureStore};

/// Generates, persists and loads one user's key pair
#[derive(Clone)]
pub struct KeyPairStore {
    store: Arc<SecureStore>,
    user_id: String,
}

impl KeyPairStore {
    /// Create a store for `user_id` on top of `store`
    pub fn new(store: Arc<SecureStore>, user_id: impl Into<String>) -> Self {
        Self {
            store,
            user_id: user_id.into(),
        }
    }

    /// Owner of the stored pair
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Generate a fresh key pair
    ///
    /// Does not persist it; see [`generate_and_persist`](Self::generate_and_persist).
    pub fn generate(&self) -> Result<KeyPair> {
        KeyPair::generate()
    }

    /// Store `pair`, replacing any previous pair for this user
    pub fn persist(&self, pair: &KeyPair) -> Result<()> {
        let record = pair.to_record();
        let json = Zeroizing::new(serde_json::to_vec(&record)?);

        self.store.store(&keys::keypair(&self.user_id), &json)?;

        tracing::info!(
            "Persisted key pair {} for {}",
            pair.public_key().short_fingerprint(),
            self.user_id
        );
        Ok(())
    }

    /// Load the stored pair, if this device has one
    pub fn load(&self) -> Result<Option<KeyPair>> {
        let data = match self.store.retrieve(&keys::keypair(&self.user_id))? {
            Some(data) => data,
            None => return Ok(None),
        };

        let record: KeyPairRecord = serde_json::from_slice(&data)
            .map_err(|e| Error::StorageCorrupted(format!("key pair record: {}", e)))?;

        KeyPair::from_record(&record).map(Some)
    }

    /// Whether a pair is stored
    pub fn exists(&self) -> Result<bool> {
        self.store.exists(&keys::keypair(&self.user_id))
    }

    /// Delete the stored pair
    ///
    /// Returns whether anything was deleted.
    pub fn delete(&self) -> Result<bool> {
        let deleted = self.store.delete(&keys::keypair(&self.user_id))?;
        if deleted {
            tracing::info!("Deleted key pair for {}", self.user_id);
        }
        Ok(deleted)
    }

    /// Generate a pair and persist it
    pub fn generate_and_persist(&self) -> Result<KeyPair> {
        let pair = self.generate()?;
        self.persist(&pair)?;
        Ok(pair)
    }

    /// Push the public half of `pair` to the directory
    pub async fn publish(&self, pair: &KeyPair, directory: &dyn Directory) -> Result<PublishedKey> {
        directory.publish(&self.user_id, &pair.public_key()).await
    }

    /// Load the stored pair or, if allowed, create one
    ///
    /// A newly generated pair is persisted and published before it is
    /// returned. For an existing pair, the directory entry is repaired if
    /// it is missing or stale; a failure there is logged and does not fail
    /// the load.
    pub async fn load_or_generate(
        &self,
        directory: &dyn Directory,
        generate_if_missing: bool,
    ) -> Result<KeyPair> {
        if let Some(pair) = self.load()? {
            self.republish_if_stale(&pair, directory).await;
            return Ok(pair);
        }

        if !generate_if_missing {
            return Err(Error::NoLocalKeyPair);
        }

        tracing::info!("No key pair for {}, generating one", self.user_id);
        let pair = self.generate_and_persist()?;
        self.publish(&pair, directory).await?;
        Ok(pair)
    }

    async fn republish_if_stale(&self, pair: &KeyPair, directory: &dyn Directory) {
        let stale = match directory.get_public_key(&self.user_id).await {
            Ok(published) => published.public_key != pair.public_key(),
            Err(Error::PeerKeyNotFound(_)) => true,
            Err(e) => {
                tracing::warn!("Could not check published key for {}: {}", self.user_id, e);
                return;
            }
        };

        if stale {
            if let Err(e) = self.publish(pair, directory).await {
                tracing::warn!("Failed to republish key for {}: {}", self.user_id, e);
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
