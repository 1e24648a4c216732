//! # Storage Module
//!
//! Local storage for the device key pair.
//!
//! ## What Is Stored Where
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SecureStore (persistent)                                       │   │
//! │  │                                                                 │   │
//! │  │  parley.keypair.<user_id>  →  KeyPairRecord JSON               │   │
//! │  │                                                                 │   │
//! │  │  Encryption: AES-256-GCM when a storage key is supplied        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  ConversationKeyStore (memory only, see `keystore`)             │   │
//! │  │                                                                 │   │
//! │  │  Conversation keys are re-derived after a restart; they are    │   │
//! │  │  never written to disk.                                        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod secure_store;

pub use secure_store::{keys, SecureStore};

use std::fmt;
use std::path::PathBuf;

use crate::config::SessionConfig;
use crate::error::Result;

/// Storage configuration
#[derive(Clone, Default)]
pub struct StorageConfig {
    /// Directory for file-backed storage (None for in-memory)
    pub path: Option<PathBuf>,
    /// AES-256-GCM key for values at rest
    pub encryption_key: Option<[u8; 32]>,
}

impl StorageConfig {
    /// Add a storage encryption key
    pub fn with_encryption_key(mut self, key: [u8; 32]) -> Self {
        self.encryption_key = Some(key);
        self
    }
}

impl From<&SessionConfig> for StorageConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            path: config.storage_path.clone(),
            encryption_key: config.storage_key,
        }
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("path", &self.path)
            .field("encrypted", &self.encryption_key.is_some())
            .finish()
    }
}

/// Initialize the storage system
pub fn init(config: StorageConfig) -> Result<SecureStore> {
    match (config.path, config.encryption_key) {
        (Some(path), None) => {
            tracing::warn!(
                "Opening {} without a storage key; the key pair will be stored unsealed",
                path.display()
            );
            SecureStore::open_dir(path, None)
        }
        (Some(path), key) => SecureStore::open_dir(path, key),
        (None, Some(key)) => Ok(SecureStore::with_encryption(key)),
        (None, None) => Ok(SecureStore::new()),
    }
}
