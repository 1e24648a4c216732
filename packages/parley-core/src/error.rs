//! # Error Handling
//!
//! Error types for Parley Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Session Errors                                                    │
//! │  │   ├── NotReady              - Key exchange has not completed        │
//! │  │   └── KeyExchangeFailed     - Exchange failed (retryable)           │
//! │  │                                                                      │
//! │  ├── Key Errors                                                        │
//! │  │   ├── NoLocalKeyPair        - Device never generated keys           │
//! │  │   ├── PeerKeyNotFound       - Peer has no published key             │
//! │  │   ├── InvalidKeyLength      - Key material is not 32 bytes          │
//! │  │   ├── InvalidKey            - Key material is malformed             │
//! │  │   ├── PublicKeyInUse        - Key already published by another user │
//! │  │   └── KeyDerivationFailed   - HKDF failed                           │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   ├── EncryptionFailed      - Sealing failed                        │
//! │  │   ├── DecryptionFailed      - Authentication tag did not verify     │
//! │  │   └── RngFailed             - No secure random source               │
//! │  │                                                                      │
//! │  ├── Storage Errors                                                    │
//! │  │   ├── StorageReadError      - Failed to read from storage           │
//! │  │   ├── StorageWriteError     - Failed to write to storage            │
//! │  │   └── StorageCorrupted      - Stored data is inconsistent           │
//! │  │                                                                      │
//! │  ├── Network Errors                                                    │
//! │  │   ├── Timeout               - Directory lookup timed out            │
//! │  │   └── TransportError        - Relay refused or dropped a message    │
//! │  │                                                                      │
//! │  └── Message Errors                                                    │
//! │      ├── NoConversationKey     - No cached key for the conversation    │
//! │      ├── UnsupportedVersion    - Unknown or retired wire version       │
//! │      ├── UnsupportedAlgorithm  - Unknown algorithm tag                 │
//! │      ├── MalformedMessage      - Bad base64 or nonce length            │
//! │      └── InvalidMessageContent - Plaintext is not valid UTF-8          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation
//!
//! Cryptographic failures are always recovered at message or conversation
//! granularity. A `DecryptionFailed` marks one message as unreadable and
//! never tears down the session; a `KeyExchangeFailed` moves one
//! conversation to `Failed` and can be retried.

use thiserror::Error;

/// Result type alias for Parley Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Parley Core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Session Errors (100-199)
    // ========================================================================

    /// Key exchange for the conversation has not reached `Ready`
    #[error("Conversation {0} is not ready: key exchange has not completed.")]
    NotReady(String),

    /// Key exchange failed (network or computation)
    #[error("Key exchange failed: {0}")]
    KeyExchangeFailed(String),

    // ========================================================================
    // Key Errors (200-299)
    // ========================================================================

    /// This device has never generated a key pair
    #[error("No local key pair. Generate encryption keys before messaging.")]
    NoLocalKeyPair,

    /// The directory has no published key for the peer
    #[error("Cannot establish secure channel: no published key for user {0}")]
    PeerKeyNotFound(String),

    /// Key material has the wrong length
    #[error("Invalid {what} length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Which input was malformed
        what: &'static str,
        /// Required length in bytes
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },

    /// Key material is malformed in some other way
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The public key is already published by a different user
    #[error("Public key is already registered to another user.")]
    PublicKeyInUse,

    /// Key derivation failed
    #[error("Failed to derive keys: {0}")]
    KeyDerivationFailed(String),

    // ========================================================================
    // Crypto Errors (300-399)
    // ========================================================================

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Authentication tag did not verify (wrong key, corruption or tampering)
    #[error("Decryption failed: message could not be authenticated")]
    DecryptionFailed,

    /// Secure random number generation failed
    #[error("Secure random number generation failed")]
    RngFailed,

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================

    /// Failed to read from storage
    #[error("Failed to read from storage: {0}")]
    StorageReadError(String),

    /// Failed to write to storage
    #[error("Failed to write to storage: {0}")]
    StorageWriteError(String),

    /// Stored data is inconsistent
    #[error("Data corruption detected: {0}")]
    StorageCorrupted(String),

    // ========================================================================
    // Network Errors (500-599)
    // ========================================================================

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Transport error
    #[error("Transport error: {0}")]
    TransportError(String),

    // ========================================================================
    // Message Errors (700-799)
    // ========================================================================

    /// No conversation key is cached for this conversation
    #[error("No key for conversation {0}")]
    NoConversationKey(String),

    /// Wire version is unknown or no longer supported
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    /// Algorithm tag is unknown
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Wire fields could not be decoded
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Invalid message content
    #[error("Invalid message content: {0}")]
    InvalidMessageContent(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl Error {
    /// Get the numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Session
    /// - 200-299: Keys
    /// - 300-399: Crypto
    /// - 400-499: Storage
    /// - 500-599: Network
    /// - 700-799: Messages
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Session (100-199)
            Error::NotReady(_) => 100,
            Error::KeyExchangeFailed(_) => 101,

            // Keys (200-299)
            Error::NoLocalKeyPair => 200,
            Error::PeerKeyNotFound(_) => 201,
            Error::InvalidKeyLength { .. } => 202,
            Error::InvalidKey(_) => 203,
            Error::PublicKeyInUse => 204,
            Error::KeyDerivationFailed(_) => 205,

            // Crypto (300-399)
            Error::EncryptionFailed(_) => 300,
            Error::DecryptionFailed => 301,
            Error::RngFailed => 302,

            // Storage (400-499)
            Error::StorageReadError(_) => 400,
            Error::StorageWriteError(_) => 401,
            Error::StorageCorrupted(_) => 402,

            // Network (500-599)
            Error::Timeout(_) => 500,
            Error::TransportError(_) => 501,

            // Messages (700-799)
            Error::NoConversationKey(_) => 700,
            Error::UnsupportedVersion(_) => 701,
            Error::UnsupportedAlgorithm(_) => 702,
            Error::MalformedMessage(_) => 703,
            Error::InvalidMessageContent(_) => 704,

            // Internal (900-999)
            Error::Internal(_) => 900,
            Error::SerializationError(_) => 901,
            Error::DeserializationError(_) => 902,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can be resolved by re-running the key exchange
    /// or retrying the send.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::KeyExchangeFailed(_)
                | Error::Timeout(_)
                | Error::TransportError(_)
                | Error::NotReady(_)
                | Error::NoConversationKey(_)
        )
    }

    /// Check if this error requires user action
    ///
    /// These are surfaced as actionable states rather than generic errors:
    /// the local user must generate keys, or the peer must register theirs.
    pub fn requires_user_action(&self) -> bool {
        matches!(self, Error::NoLocalKeyPair | Error::PeerKeyNotFound(_))
    }

    /// Whether this error is a security event rather than a missing
    /// prerequisite
    pub fn is_security_event(&self) -> bool {
        matches!(self, Error::DecryptionFailed)
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Error::DeserializationError(err.to_string())
        } else {
            Error::SerializationError(err.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::StorageReadError(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::NotReady("c1".into()).code(), 100);
        assert_eq!(Error::NoLocalKeyPair.code(), 200);
        assert_eq!(Error::DecryptionFailed.code(), 301);
        assert_eq!(Error::StorageReadError("x".into()).code(), 400);
        assert_eq!(Error::Timeout("x".into()).code(), 500);
        assert_eq!(Error::NoConversationKey("c1".into()).code(), 700);
        assert_eq!(Error::Internal("test".into()).code(), 900);
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::KeyExchangeFailed("net".into()).is_recoverable());
        assert!(Error::Timeout("dir".into()).is_recoverable());
        assert!(!Error::DecryptionFailed.is_recoverable());
        assert!(!Error::NoLocalKeyPair.is_recoverable());
    }

    #[test]
    fn test_user_action_errors() {
        assert!(Error::NoLocalKeyPair.requires_user_action());
        assert!(Error::PeerKeyNotFound("bob".into()).requires_user_action());
        assert!(!Error::DecryptionFailed.requires_user_action());
    }

    #[test]
    fn test_missing_key_and_auth_failure_are_distinct() {
        let missing = Error::NoConversationKey("c1".into());
        let forged = Error::DecryptionFailed;

        assert_ne!(missing.code(), forged.code());
        assert!(forged.is_security_event());
        assert!(!missing.is_security_event());
    }

    #[test]
    fn test_invalid_key_length_message() {
        let err = Error::InvalidKeyLength {
            what: "public key",
            expected: 32,
            actual: 31,
        };
        let msg = err.to_string();
        assert!(msg.contains("public key"));
        assert!(msg.contains("32"));
        assert!(msg.contains("31"));
    }

    #[test]
    fn test_json_error_conversion() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::DeserializationError(_)));
    }
}
