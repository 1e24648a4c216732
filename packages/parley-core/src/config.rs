//! # Configuration
//!
//! Settings for a [`SecureSession`](crate::session::SecureSession).
//!
//! Every field has a default, so an empty JSON object is a valid config:
//!
//! ```text
//! {
//!   "exchange_timeout_ms": 10000,
//!   "generate_if_missing": true,
//!   "storage_path": "/var/lib/parley/keys",
//!   "verbose_logging": false
//! }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default directory lookup timeout during a key exchange
pub const DEFAULT_EXCHANGE_TIMEOUT_MS: u64 = 10_000;

/// Configuration for a secure session
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Timeout for fetching the peer's key, in milliseconds
    pub exchange_timeout_ms: u64,
    /// Generate, persist and publish a key pair when none is stored
    pub generate_if_missing: bool,
    /// Directory for file-backed storage (None for in-memory)
    pub storage_path: Option<PathBuf>,
    /// AES-256-GCM key sealing stored values at rest
    ///
    /// Never read from or written to JSON.
    #[serde(skip)]
    pub storage_key: Option<[u8; 32]>,
    /// Enable verbose logging
    pub verbose_logging: bool,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("exchange_timeout_ms", &self.exchange_timeout_ms)
            .field("generate_if_missing", &self.generate_if_missing)
            .field("storage_path", &self.storage_path)
            .field("storage_key", &self.storage_key.map(|_| "<redacted>"))
            .field("verbose_logging", &self.verbose_logging)
            .finish()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            exchange_timeout_ms: DEFAULT_EXCHANGE_TIMEOUT_MS,
            generate_if_missing: true,
            storage_path: None,
            storage_key: None,
            verbose_logging: cfg!(feature = "verbose-logging"),
        }
    }
}

impl SessionConfig {
    /// Parse from JSON, filling missing fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Key exchange timeout
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }

    /// Set the key exchange timeout
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set whether a missing key pair is generated on open
    pub fn with_generate_if_missing(mut self, generate: bool) -> Self {
        self.generate_if_missing = generate;
        self
    }

    /// Use file-backed storage under `path`
    pub fn with_storage_path(mut self, path: impl AsRef<Path>) -> Self {
        self.storage_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Seal stored values with `key`
    pub fn with_storage_key(mut self, key: [u8; 32]) -> Self {
        self.storage_key = Some(key);
        self
    }

    /// Enable or disable verbose logging
    pub fn with_verbose_logging(mut self, verbose: bool) -> Self {
        self.verbose_logging = verbose;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.exchange_timeout(), Duration::from_secs(10));
        assert!(config.generate_if_missing);
        assert!(config.storage_path.is_none());
    }

    #[test]
    fn test_empty_json_is_default() {
        let config = SessionConfig::from_json("{}").unwrap();
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn test_partial_json() {
        let config =
            SessionConfig::from_json(r#"{"exchange_timeout_ms": 250, "generate_if_missing": false}"#)
                .unwrap();

        assert_eq!(config.exchange_timeout(), Duration::from_millis(250));
        assert!(!config.generate_if_missing);
        assert!(config.storage_path.is_none());
    }

    #[test]
    fn test_invalid_json() {
        assert!(SessionConfig::from_json(r#"{"exchange_timeout_ms": "soon"}"#).is_err());
    }

    #[test]
    fn test_builders() {
        let config = SessionConfig::default()
            .with_exchange_timeout(Duration::from_millis(50))
            .with_generate_if_missing(false)
            .with_storage_path("/tmp/parley")
            .with_verbose_logging(true);

        assert_eq!(config.exchange_timeout_ms, 50);
        assert!(!config.generate_if_missing);
        assert_eq!(config.storage_path, Some(PathBuf::from("/tmp/parley")));
        assert!(config.verbose_logging);
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let config = SessionConfig::default().with_exchange_timeout(Duration::MAX);
        assert_eq!(config.exchange_timeout_ms, u64::MAX);
    }

    #[test]
    fn test_storage_key_stays_out_of_json_and_debug() {
        let config = SessionConfig::default().with_storage_key([7u8; 32]);

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("storage_key"));

        let debug = format!("{:?}", config);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("7, 7"));

        assert!(SessionConfig::from_json(&json).unwrap().storage_key.is_none());
    }
}
