//! # Wire Messages
//!
//! The JSON shape an encrypted message takes between clients, and the typed
//! form it is parsed into before decryption.
//!
//! ## Wire Format
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ENCRYPTED MESSAGE                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  {                                                                     │
//! │    "ciphertext": "<base64: 16-byte tag || encrypted bytes>",           │
//! │    "nonce":      "<base64: 24 bytes>",                                 │
//! │    "algorithm":  "XSalsa20-Poly1305",                                  │
//! │    "version":    "2.0"                                                 │
//! │  }                                                                     │
//! │                                                                         │
//! │  Relays must carry all four fields unchanged. They are strings so     │
//! │  any JSON transport can forward them without interpreting them.       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Versions
//!
//! | Version | Meaning | Handling |
//! |---------|---------|----------|
//! | `"2.0"` | X25519 + HKDF + XSalsa20-Poly1305 | Decrypted |
//! | `"1.0"` | Legacy server-issued symmetric key | Rejected |
//! | anything else | Unknown | Rejected |

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::crypto::{Algorithm, Nonce, TAG_SIZE};
use crate::error::{Error, Result};

/// Current protocol version string
pub const CURRENT_VERSION: &str = "2.0";

/// Encrypted message as it travels over the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    /// Base64 sealed bytes (tag included)
    pub ciphertext: String,
    /// Base64 24-byte nonce
    pub nonce: String,
    /// Algorithm tag
    pub algorithm: String,
    /// Protocol version
    pub version: String,
}

impl EncryptedMessage {
    /// Serialize to the JSON wire form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from the JSON wire form
    ///
    /// Only checks the shape; version and field contents are validated by
    /// [`SealedMessage::parse`].
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Known protocol versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// `"1.0"`: the retired scheme where the server issued conversation keys
    Legacy,
    /// `"2.0"`: true end-to-end encryption
    V2,
}

impl ProtocolVersion {
    /// Parse a version string
    pub fn parse(version: &str) -> Result<Self> {
        match version {
            "1.0" => Ok(ProtocolVersion::Legacy),
            "2.0" => Ok(ProtocolVersion::V2),
            other => Err(Error::UnsupportedVersion(other.to_string())),
        }
    }

    /// Version string on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::Legacy => "1.0",
            ProtocolVersion::V2 => CURRENT_VERSION,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated, decoded encrypted message
///
/// One variant per decryptable protocol version. Matching on it is
/// exhaustive, so a new version cannot be half-handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SealedMessage {
    /// Version 2.0
    V2 {
        /// Cipher used
        algorithm: Algorithm,
        /// Per-message nonce
        nonce: Nonce,
        /// Tag and encrypted bytes
        ciphertext: Vec<u8>,
    },
}

impl SealedMessage {
    /// Validate and decode a wire message
    ///
    /// ## Errors
    ///
    /// - `UnsupportedVersion` for `"1.0"` and any unknown version
    /// - `UnsupportedAlgorithm` for anything other than XSalsa20-Poly1305
    /// - `MalformedMessage` for bad base64, a nonce that is not 24 bytes, or
    ///   a ciphertext too short to hold the tag
    pub fn parse(message: &EncryptedMessage) -> Result<Self> {
        match ProtocolVersion::parse(&message.version)? {
            ProtocolVersion::Legacy => Err(Error::UnsupportedVersion(format!(
                "{} (legacy server-key messages cannot be decrypted)",
                message.version
            ))),
            ProtocolVersion::V2 => {
                let algorithm = Algorithm::parse(&message.algorithm)?;

                let nonce = BASE64
                    .decode(&message.nonce)
                    .map_err(|e| Error::MalformedMessage(format!("nonce is not base64: {}", e)))?;
                let nonce = Nonce::from_slice(&nonce)?;

                let ciphertext = BASE64.decode(&message.ciphertext).map_err(|e| {
                    Error::MalformedMessage(format!("ciphertext is not base64: {}", e))
                })?;
                if ciphertext.len() < TAG_SIZE {
                    return Err(Error::MalformedMessage(format!(
                        "ciphertext is {} bytes, shorter than the {}-byte tag",
                        ciphertext.len(),
                        TAG_SIZE
                    )));
                }

                Ok(SealedMessage::V2 {
                    algorithm,
                    nonce,
                    ciphertext,
                })
            }
        }
    }

    /// Encode into the wire form
    pub fn to_wire(&self) -> EncryptedMessage {
        match self {
            SealedMessage::V2 {
                algorithm,
                nonce,
                ciphertext,
            } => EncryptedMessage {
                ciphertext: BASE64.encode(ciphertext),
                nonce: BASE64.encode(nonce.as_bytes()),
                algorithm: algorithm.as_str().to_string(),
                version: ProtocolVersion::V2.as_str().to_string(),
            },
        }
    }

    /// Protocol version of this message
    pub fn version(&self) -> ProtocolVersion {
        match self {
            SealedMessage::V2 { .. } => ProtocolVersion::V2,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NONCE_SIZE;

    fn valid_wire() -> EncryptedMessage {
        SealedMessage::V2 {
            algorithm: Algorithm::XSalsa20Poly1305,
            nonce: Nonce::from_bytes([7u8; NONCE_SIZE]),
            ciphertext: vec![1u8; TAG_SIZE + 5],
        }
        .to_wire()
    }

    #[test]
    fn test_wire_json_field_names() {
        let json = valid_wire().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert!(value["ciphertext"].is_string());
        assert!(value["nonce"].is_string());
        assert_eq!(value["algorithm"], "XSalsa20-Poly1305");
        assert_eq!(value["version"], "2.0");
    }

    #[test]
    fn test_parse_valid_message() {
        let wire = valid_wire();
        let sealed = SealedMessage::parse(&wire).unwrap();

        assert_eq!(sealed.version(), ProtocolVersion::V2);
        assert_eq!(sealed.to_wire(), wire);
    }

    #[test]
    fn test_json_preserves_fields() {
        let wire = valid_wire();
        let restored = EncryptedMessage::from_json(&wire.to_json().unwrap()).unwrap();
        assert_eq!(restored, wire);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut wire = valid_wire();
        wire.version = "3.0".into();

        assert!(matches!(
            SealedMessage::parse(&wire),
            Err(Error::UnsupportedVersion(v)) if v == "3.0"
        ));
    }

    #[test]
    fn test_legacy_version_rejected() {
        let mut wire = valid_wire();
        wire.version = "1.0".into();

        assert_eq!(ProtocolVersion::parse("1.0").unwrap(), ProtocolVersion::Legacy);
        assert!(matches!(
            SealedMessage::parse(&wire),
            Err(Error::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let mut wire = valid_wire();
        wire.algorithm = "RSA-OAEP".into();

        assert!(matches!(
            SealedMessage::parse(&wire),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_malformed_fields_rejected() {
        let mut bad_b64 = valid_wire();
        bad_b64.nonce = "not base64!".into();
        assert!(matches!(
            SealedMessage::parse(&bad_b64),
            Err(Error::MalformedMessage(_))
        ));

        let mut short_nonce = valid_wire();
        short_nonce.nonce = BASE64.encode([0u8; 12]);
        assert!(matches!(
            SealedMessage::parse(&short_nonce),
            Err(Error::MalformedMessage(_))
        ));

        let mut short_ciphertext = valid_wire();
        short_ciphertext.ciphertext = BASE64.encode([0u8; 4]);
        assert!(matches!(
            SealedMessage::parse(&short_ciphertext),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_missing_field_is_deserialization_error() {
        let result = EncryptedMessage::from_json(r#"{"ciphertext":"AA==","nonce":"AA=="}"#);
        assert!(matches!(result, Err(Error::DeserializationError(_))));
    }
}
