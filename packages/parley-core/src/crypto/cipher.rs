//! # Message Cipher
//!
//! XSalsa20-Poly1305 (NaCl `secretbox`) sealing of a single message under a
//! conversation key.
//!
//! ## Encryption Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      MESSAGE ENCRYPTION FLOW                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Step 1: Generate Nonce (unique per message)                           │
//! │  ┌─────────────────────────────────────────────────────────────┐       │
//! │  │  Random 24 bytes from the OS CSPRNG                          │       │
//! │  │  (Never reuse a nonce with the same key!)                   │       │
//! │  └─────────────────────────────────────────────────────────────┘       │
//! │                                                                         │
//! │  Step 2: Seal                                                          │
//! │  ┌─────────────────────────────────────────────────────────────┐       │
//! │  │  XSalsa20-Poly1305(                                          │       │
//! │  │    key = conversation_key,                                  │       │
//! │  │    nonce = random_nonce,                                    │       │
//! │  │    plaintext = message,                                     │       │
//! │  │  )                                                          │       │
//! │  │           ↓                                                  │       │
//! │  │  16-byte Poly1305 tag || ciphertext                         │       │
//! │  └─────────────────────────────────────────────────────────────┘       │
//! │                                                                         │
//! │  Output: EncryptedMessage {                                            │
//! │    ciphertext: base64, nonce: base64,                                  │
//! │    algorithm: "XSalsa20-Poly1305", version: "2.0"                      │
//! │  }                                                                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The byte layout (tag first) is the one NaCl and tweetnacl produce, so
//! messages interoperate with the web client.
//!
//! ## Security Properties
//!
//! | Property | Guarantee |
//! |----------|-----------|
//! | Confidentiality | Only holders of the conversation key can read |
//! | Integrity | Any modification is detected by the Poly1305 tag |
//! | Nonce misuse | 192-bit random nonces make collisions negligible |

use std::fmt;

use crypto_secretbox::{
    aead::{Aead, KeyInit},
    Nonce as BoxNonce, XSalsa20Poly1305,
};
use rand::{rngs::OsRng, RngCore};

use super::kdf::ConversationKey;
use crate::error::{Error, Result};
use crate::message::{EncryptedMessage, SealedMessage};

/// Size of the XSalsa20 nonce in bytes (192 bits)
pub const NONCE_SIZE: usize = 24;

/// Size of the Poly1305 authentication tag in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Authenticated cipher used for message payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// NaCl `secretbox`
    XSalsa20Poly1305,
}

impl Algorithm {
    /// Tag carried in the `algorithm` field on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::XSalsa20Poly1305 => "XSalsa20-Poly1305",
        }
    }

    /// Parse a wire tag
    pub fn parse(tag: &str) -> Result<Self> {
        match tag {
            "XSalsa20-Poly1305" => Ok(Algorithm::XSalsa20Poly1305),
            other => Err(Error::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A nonce (number used once) for XSalsa20-Poly1305
///
/// ## Critical Security Requirement
///
/// **NEVER reuse a nonce with the same key!** Two messages sealed under the
/// same key and nonce leak the XOR of their plaintexts and allow forging.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Generate a cryptographically random nonce
    pub fn random() -> Result<Self> {
        let mut bytes = [0u8; NONCE_SIZE];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|_| Error::RngFailed)?;
        Ok(Self(bytes))
    }

    /// Create from existing bytes
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, checking the length
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; NONCE_SIZE] = bytes.try_into().map_err(|_| {
            Error::MalformedMessage(format!(
                "nonce must be {} bytes, got {}",
                NONCE_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", hex::encode(self.0))
    }
}

/// Encrypt a message under a conversation key
///
/// Draws a fresh nonce on every call and returns the wire form.
pub fn encrypt(plaintext: &[u8], key: &ConversationKey) -> Result<EncryptedMessage> {
    let nonce = Nonce::random()?;
    let ciphertext = seal(key, &nonce, plaintext)?;

    let sealed = SealedMessage::V2 {
        algorithm: Algorithm::XSalsa20Poly1305,
        nonce,
        ciphertext,
    };
    Ok(sealed.to_wire())
}

/// Seal with an explicit nonce
///
/// Callers are responsible for never repeating `nonce` under `key`.
pub fn seal(key: &ConversationKey, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XSalsa20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| Error::EncryptionFailed(format!("Invalid key: {}", e)))?;

    cipher
        .encrypt(BoxNonce::from_slice(nonce.as_bytes()), plaintext)
        .map_err(|e| Error::EncryptionFailed(format!("Encryption failed: {}", e)))
}

/// Decrypt raw sealed bytes
///
/// ## Errors
///
/// Returns `DecryptionFailed` if:
/// - The ciphertext was tampered with or truncated
/// - The key is wrong
/// - The nonce is wrong
///
/// No partial plaintext is ever returned.
pub fn decrypt(ciphertext: &[u8], nonce: &Nonce, key: &ConversationKey) -> Result<Vec<u8>> {
    let cipher =
        XSalsa20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| Error::DecryptionFailed)?;

    cipher
        .decrypt(BoxNonce::from_slice(nonce.as_bytes()), ciphertext)
        .map_err(|_| Error::DecryptionFailed)
}

/// Decrypt a wire message
///
/// The version and algorithm are checked before any cryptography runs.
pub fn decrypt_message(message: &EncryptedMessage, key: &ConversationKey) -> Result<Vec<u8>> {
    match SealedMessage::parse(message)? {
        SealedMessage::V2 {
            algorithm: Algorithm::XSalsa20Poly1305,
            nonce,
            ciphertext,
        } => decrypt(&ciphertext, &nonce, key),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

    fn key(byte: u8) -> ConversationKey {
        ConversationKey::from_bytes([byte; 32])
    }

    fn raw_parts(message: &EncryptedMessage) -> (Vec<u8>, Nonce) {
        let ciphertext = BASE64.decode(&message.ciphertext).unwrap();
        let nonce = Nonce::from_slice(&BASE64.decode(&message.nonce).unwrap()).unwrap();
        (ciphertext, nonce)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = key(42);
        for plaintext in [
            &b""[..],
            &b"a"[..],
            &b"Hello, Bob!"[..],
            &[0xFFu8; 4096][..],
        ] {
            let message = encrypt(plaintext, &key).unwrap();
            let decrypted = decrypt_message(&message, &key).unwrap();
            assert_eq!(decrypted, plaintext);
        }
    }

    #[test]
    fn test_wire_metadata() {
        let message = encrypt(b"hi", &key(1)).unwrap();

        assert_eq!(message.algorithm, "XSalsa20-Poly1305");
        assert_eq!(message.version, "2.0");

        let (ciphertext, _) = raw_parts(&message);
        assert_eq!(ciphertext.len(), 2 + TAG_SIZE);
        assert_eq!(BASE64.decode(&message.nonce).unwrap().len(), NONCE_SIZE);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = key(7);
        let message = encrypt(b"attack at dawn", &key).unwrap();
        let (ciphertext, nonce) = raw_parts(&message);

        for i in 0..ciphertext.len() {
            for bit in 0..8 {
                let mut tampered = ciphertext.clone();
                tampered[i] ^= 1 << bit;
                assert!(matches!(
                    decrypt(&tampered, &nonce, &key),
                    Err(Error::DecryptionFailed)
                ));
            }
        }
    }

    #[test]
    fn test_tampered_nonce_fails() {
        let key = key(7);
        let message = encrypt(b"attack at dawn", &key).unwrap();
        let (ciphertext, nonce) = raw_parts(&message);

        for i in 0..NONCE_SIZE {
            let mut bytes = *nonce.as_bytes();
            bytes[i] ^= 0x01;
            let result = decrypt(&ciphertext, &Nonce::from_bytes(bytes), &key);
            assert!(matches!(result, Err(Error::DecryptionFailed)));
        }
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = key(9);
        let m1 = encrypt(b"same plaintext", &key).unwrap();
        let m2 = encrypt(b"same plaintext", &key).unwrap();

        assert_ne!(m1.nonce, m2.nonce);
        assert_ne!(m1.ciphertext, m2.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let message = encrypt(b"secret", &key(1)).unwrap();
        let result = decrypt_message(&message, &key(2));

        assert!(matches!(result, Err(Error::DecryptionFailed)));
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = key(3);
        let message = encrypt(b"secret", &key).unwrap();
        let (ciphertext, nonce) = raw_parts(&message);

        let result = decrypt(&ciphertext[..TAG_SIZE - 1], &nonce, &key);
        assert!(matches!(result, Err(Error::DecryptionFailed)));
    }

    #[test]
    fn test_seal_with_fixed_nonce_is_deterministic() {
        let key = key(5);
        let nonce = Nonce::from_bytes([1u8; NONCE_SIZE]);

        let c1 = seal(&key, &nonce, b"msg").unwrap();
        let c2 = seal(&key, &nonce, b"msg").unwrap();
        assert_eq!(c1, c2);
        assert_eq!(decrypt(&c1, &nonce, &key).unwrap(), b"msg");
    }

    #[test]
    fn test_algorithm_tags() {
        assert_eq!(
            Algorithm::parse("XSalsa20-Poly1305").unwrap(),
            Algorithm::XSalsa20Poly1305
        );
        assert!(matches!(
            Algorithm::parse("AES-256-GCM"),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_nonce_from_slice_length() {
        assert!(Nonce::from_slice(&[0u8; 24]).is_ok());
        assert!(matches!(
            Nonce::from_slice(&[0u8; 12]),
            Err(Error::MalformedMessage(_))
        ));
    }
}
