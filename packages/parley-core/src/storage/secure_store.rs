//! # Secure Storage
//!
//! Device-local storage for sensitive data like the key pair record.
//!
//! ## Backends
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SECURE STORAGE                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SecureStore                                                    │   │
//! │  │  ───────────                                                     │   │
//! │  │                                                                 │   │
//! │  │  • store(key, value)   - Store (optionally encrypted) data     │   │
//! │  │  • retrieve(key)       - Retrieve and decrypt data             │   │
//! │  │  • delete(key)         - Delete data                           │   │
//! │  │  • exists(key)         - Check if key exists                   │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌───────────────────────┐        ┌───────────────────────────────┐    │
//! │  │  Memory               │        │  Directory                     │    │
//! │  │                       │        │                                │    │
//! │  │ - RwLock<HashMap>     │        │ - One file per entry           │    │
//! │  │ - Gone on drop        │        │ - Hex-encoded file names       │    │
//! │  │ - Tests and ephemeral │        │ - Temp file + rename           │    │
//! │  │   sessions            │        │ - Mode 0600 on unix            │    │
//! │  └───────────────────────┘        └───────────────────────────────┘    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Encryption at Rest
//!
//! With a storage key, each value is sealed with AES-256-GCM before it
//! reaches the backend. The stored blob is `nonce (12) || ciphertext`, and
//! the entry name is bound as associated data so blobs cannot be swapped
//! between entries.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce as AesNonce,
};
use parking_lot::RwLock;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, Result};

/// Size of the AES-GCM nonce in bytes (96 bits)
const STORAGE_NONCE_SIZE: usize = 12;

/// Longest hex-encoded entry name used as-is; longer names are hashed
const MAX_PLAIN_NAME_LEN: usize = 128;

/// Extension used for entry files
const ENTRY_EXTENSION: &str = "bin";

/// Key names for secure storage
pub mod keys {
    /// Entry holding a user's key pair record
    ///
    /// Scoped by user id so several accounts can share one device store.
    pub fn keypair(user_id: &str) -> String {
        format!("parley.keypair.{}", user_id)
    }
}

/// AES-256-GCM key protecting values at rest
#[derive(ZeroizeOnDrop)]
struct StorageKey([u8; 32]);

enum Backend {
    Memory(RwLock<HashMap<String, Vec<u8>>>),
    Directory(PathBuf),
}

/// Secure storage
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct SecureStore {
    backend: Backend,

    /// Optional encryption key for additional protection
    encryption_key: Option<StorageKey>,
}

impl SecureStore {
    /// Create an in-memory secure store
    pub fn new() -> Self {
        Self {
            backend: Backend::Memory(RwLock::new(HashMap::new())),
            encryption_key: None,
        }
    }

    /// Create an in-memory secure store with an encryption key
    ///
    /// All data will be encrypted before storage.
    pub fn with_encryption(key: [u8; 32]) -> Self {
        Self {
            backend: Backend::Memory(RwLock::new(HashMap::new())),
            encryption_key: Some(StorageKey(key)),
        }
    }

    /// Open a file-backed store rooted at `path`
    ///
    /// The directory is created if it does not exist.
    pub fn open_dir(path: impl AsRef<Path>, encryption_key: Option<[u8; 32]>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path).map_err(|e| {
            Error::StorageWriteError(format!(
                "failed to create storage directory {}: {}",
                path.display(),
                e
            ))
        })?;

        tracing::debug!("Opened secure store at {}", path.display());

        Ok(Self {
            backend: Backend::Directory(path),
            encryption_key: encryption_key.map(StorageKey),
        })
    }

    /// Whether values are encrypted before they reach the backend
    pub fn is_encrypted(&self) -> bool {
        self.encryption_key.is_some()
    }

    /// Store data securely
    ///
    /// The data will be encrypted if an encryption key was provided.
    pub fn store(&self, key: &str, value: &[u8]) -> Result<()> {
        let data = match self.encryption_key {
            Some(ref enc_key) => seal(enc_key, key, value)?,
            None => value.to_vec(),
        };

        self.store_raw(key, &data)
    }

    /// Retrieve data securely
    ///
    /// The data will be decrypted if an encryption key was provided.
    pub fn retrieve(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let data = match self.retrieve_raw(key)? {
            Some(d) => d,
            None => return Ok(None),
        };

        let result = match self.encryption_key {
            Some(ref enc_key) => open(enc_key, key, &data)?,
            None => Zeroizing::new(data),
        };

        Ok(Some(result))
    }

    /// Delete data from secure storage
    pub fn delete(&self, key: &str) -> Result<bool> {
        self.delete_raw(key)
    }

    /// Check if a key exists
    pub fn exists(&self, key: &str) -> Result<bool> {
        self.exists_raw(key)
    }

    // ========================================================================
    // BACKEND IMPLEMENTATIONS
    // ========================================================================

    fn store_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        match &self.backend {
            Backend::Memory(memory) => {
                memory.write().insert(key.to_string(), value.to_vec());
                Ok(())
            }
            Backend::Directory(root) => write_entry(&entry_path(root, key), value),
        }
    }

    fn retrieve_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match &self.backend {
            Backend::Memory(memory) => Ok(memory.read().get(key).cloned()),
            Backend::Directory(root) => match fs::read(entry_path(root, key)) {
                Ok(data) => Ok(Some(data)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(Error::StorageReadError(format!(
                    "failed to read entry {}: {}",
                    key, e
                ))),
            },
        }
    }

    fn delete_raw(&self, key: &str) -> Result<bool> {
        match &self.backend {
            Backend::Memory(memory) => Ok(memory.write().remove(key).is_some()),
            Backend::Directory(root) => match fs::remove_file(entry_path(root, key)) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(Error::StorageWriteError(format!(
                    "failed to delete entry {}: {}",
                    key, e
                ))),
            },
        }
    }

    fn exists_raw(&self, key: &str) -> Result<bool> {
        match &self.backend {
            Backend::Memory(memory) => Ok(memory.read().contains_key(key)),
            Backend::Directory(root) => Ok(entry_path(root, key).is_file()),
        }
    }
}

impl Default for SecureStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn seal(enc_key: &StorageKey, name: &str, value: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(&enc_key.0)
        .map_err(|e| Error::EncryptionFailed(format!("Invalid storage key: {}", e)))?;

    let mut nonce = [0u8; STORAGE_NONCE_SIZE];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|_| Error::RngFailed)?;

    let payload = Payload {
        msg: value,
        aad: name.as_bytes(),
    };
    let ciphertext = cipher
        .encrypt(AesNonce::from_slice(&nonce), payload)
        .map_err(|e| Error::EncryptionFailed(format!("Storage encryption failed: {}", e)))?;

    let mut result = nonce.to_vec();
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

fn open(enc_key: &StorageKey, name: &str, data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if data.len() < STORAGE_NONCE_SIZE {
        return Err(Error::StorageCorrupted(format!(
            "entry {} is too short to be encrypted data",
            name
        )));
    }

    let (nonce, ciphertext) = data.split_at(STORAGE_NONCE_SIZE);
    let cipher = Aes256Gcm::new_from_slice(&enc_key.0)
        .map_err(|e| Error::StorageReadError(format!("Invalid storage key: {}", e)))?;

    let payload = Payload {
        msg: ciphertext,
        aad: name.as_bytes(),
    };
    cipher
        .decrypt(AesNonce::from_slice(nonce), payload)
        .map(Zeroizing::new)
        .map_err(|_| {
            Error::StorageCorrupted(format!(
                "entry {} failed authentication (wrong storage key or tampered)",
                name
            ))
        })
}

/// Entry names may contain any character, so they are hex-encoded
fn entry_path(root: &Path, key: &str) -> PathBuf {
    let encoded = hex::encode(key.as_bytes());
    let name = if encoded.len() <= MAX_PLAIN_NAME_LEN {
        encoded
    } else {
        // '-' never appears in hex, so hashed names cannot collide with plain ones
        format!("h-{}", hex::encode(Sha256::digest(key.as_bytes())))
    };
    root.join(format!("{}.{}", name, ENTRY_EXTENSION))
}

fn write_entry(path: &Path, value: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    let result = write_and_rename(&temp_path, path, value);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_and_rename(temp_path: &Path, path: &Path, value: &[u8]) -> Result<()> {
    let mut options = OpenOptions::new();
    options.create(true).truncate(true).write(true);
    #[cfg(unix)]
    {
        options.mode(0o600);
    }

    let write_err = |e: std::io::Error| {
        Error::StorageWriteError(format!("failed to write {}: {}", path.display(), e))
    };

    let mut file = options.open(temp_path).map_err(write_err)?;
    file.write_all(value).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);

    fs::rename(temp_path, path).map_err(write_err)?;

    #[cfg(unix)]
    {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(write_err)?;
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
