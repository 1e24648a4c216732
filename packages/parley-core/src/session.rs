//! # Secure Session
//!
//! The entry point the messaging layer talks to. A session owns one user's
//! key pair on this device and tracks, per conversation, whether a key
//! exchange has produced a usable conversation key.
//!
//! ## Conversation State Machine
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     PER-CONVERSATION STATE                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │               ensure_key_exchange()                                    │
//! │   ┌────────┐ ─────────────────────► ┌────────────┐                     │
//! │   │ NoKey  │                        │ Exchanging │                     │
//! │   └────────┘ ◄───────────────────── └─────┬──────┘                     │
//! │       ▲        call dropped mid-flight    │                            │
//! │       │                          ┌────────┴────────┐                   │
//! │       │                          ▼                 ▼                   │
//! │       │                    ┌──────────┐      ┌──────────┐              │
//! │       │                    │  Ready   │      │  Failed  │              │
//! │       │                    └──────────┘      └────┬─────┘              │
//! │       │                                           │                    │
//! │       │        reset / logout        ensure_key_exchange() (retry)     │
//! │       └───────────────────────────────────────────┘                    │
//! │                                                                         │
//! │  Ready:      encrypt_outgoing / decrypt_incoming allowed               │
//! │  otherwise:  encrypt_outgoing → NotReady,                              │
//! │              decrypt_incoming → NoConversationKey                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Exchange
//!
//! ```text
//!   1. Directory.get_public_key(peer)        (bounded by exchange_timeout)
//!   2. X25519(own private, peer public)      → SharedSecret
//!   3. HKDF(SharedSecret, conversation_id)   → ConversationKey
//!   4. ConversationKeyStore.put(conversation_id, key)
//! ```
//!
//! Exchanges for different conversations are independent and may run
//! concurrently on the same session.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::SessionConfig;
use crate::crypto::{self, ConversationKey, KeyPair, PublicKey, SafetyNumber};
use crate::directory::{Directory, PublishedKey};
use crate::error::{Error, Result};
use crate::keystore::{ConversationKeyStore, KeyPairStore};
use crate::message::EncryptedMessage;
use crate::storage::{self, SecureStore, StorageConfig};
use crate::transport::{IncomingMessage, Transport};

/// Where a conversation stands in the key exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationState {
    /// No exchange has been attempted (or it was reset)
    NoKey,
    /// An exchange is in flight
    Exchanging,
    /// The conversation key is cached; messages can flow
    Ready,
    /// The last exchange failed; retry with `ensure_key_exchange`
    Failed(FailureReason),
}

impl ConversationState {
    /// Whether messages can be encrypted and decrypted
    pub fn is_ready(&self) -> bool {
        matches!(self, ConversationState::Ready)
    }
}

/// Why a key exchange failed, in a form the UI can act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReason {
    /// Error code (see [`Error::code`])
    pub code: i32,
    /// Human-readable description
    pub message: String,
    /// Retrying may help
    pub recoverable: bool,
    /// Someone must act first (generate keys, peer must register)
    pub requires_user_action: bool,
}

impl From<&Error> for FailureReason {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            requires_user_action: err.requires_user_action(),
        }
    }
}

struct ConversationEntry {
    state: ConversationState,
    peer: Option<PublishedKey>,
}

/// One user's end-to-end encryption context on this device
pub struct SecureSession {
    user_id: String,
    config: SessionConfig,
    key_pair: KeyPair,
    key_pair_store: KeyPairStore,
    directory: Arc<dyn Directory>,
    conversation_keys: ConversationKeyStore,
    conversations: RwLock<HashMap<String, ConversationEntry>>,
}

impl SecureSession {
    /// Open a session with storage built from `config.storage_path`
    pub async fn open(
        config: SessionConfig,
        user_id: impl Into<String>,
        directory: Arc<dyn Directory>,
    ) -> Result<Self> {
        let store = storage::init(StorageConfig::from(&config))?;
        Self::open_with_store(config, user_id, Arc::new(store), directory).await
    }

    /// Open a session on an existing secure store
    ///
    /// Loads the user's key pair. When none is stored, one is generated,
    /// persisted and published if `config.generate_if_missing` is set;
    /// otherwise opening fails with `NoLocalKeyPair`.
    pub async fn open_with_store(
        config: SessionConfig,
        user_id: impl Into<String>,
        store: Arc<SecureStore>,
        directory: Arc<dyn Directory>,
    ) -> Result<Self> {
        let user_id = user_id.into();
        let key_pair_store = KeyPairStore::new(store, user_id.clone());

        let key_pair = key_pair_store
            .load_or_generate(directory.as_ref(), config.generate_if_missing)
            .await?;

        tracing::info!(
            "Opened secure session for {} with key {}",
            user_id,
            key_pair.public_key().short_fingerprint()
        );

        Ok(Self {
            user_id,
            config,
            key_pair,
            key_pair_store,
            directory,
            conversation_keys: ConversationKeyStore::new(),
            conversations: RwLock::new(HashMap::new()),
        })
    }

    /// The local user
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// This device's public key
    pub fn public_key(&self) -> PublicKey {
        self.key_pair.public_key()
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current state of `conversation_id`
    pub fn state(&self, conversation_id: &str) -> ConversationState {
        self.conversations
            .read()
            .get(conversation_id)
            .map(|entry| entry.state.clone())
            .unwrap_or(ConversationState::NoKey)
    }

    /// Whether `conversation_id` is ready for messages
    pub fn is_ready(&self, conversation_id: &str) -> bool {
        self.state(conversation_id).is_ready()
    }

    /// The peer key captured by the last successful exchange
    pub fn peer_key(&self, conversation_id: &str) -> Option<PublishedKey> {
        self.conversations
            .read()
            .get(conversation_id)
            .and_then(|entry| entry.peer.clone())
    }

    // ========================================================================
    // KEY EXCHANGE
    // ========================================================================

    /// Make sure `conversation_id` has a conversation key shared with
    /// `peer_user_id`
    ///
    /// Returns immediately if the conversation is already `Ready` with the
    /// same peer. On failure the conversation moves to `Failed` and the
    /// error is returned; calling again retries from scratch. If the
    /// returned future is dropped before completion, the conversation goes
    /// back to `NoKey`.
    pub async fn ensure_key_exchange(&self, conversation_id: &str, peer_user_id: &str) -> Result<()> {
        if self.is_ready_with(conversation_id, peer_user_id) {
            return Ok(());
        }

        // Drop any key from a previous exchange
        self.conversation_keys.remove(conversation_id);
        self.set_state(conversation_id, ConversationState::Exchanging, None);
        let mut guard = ExchangeGuard::new(&self.conversations, conversation_id);

        tracing::info!(
            "Starting key exchange for {} with {}",
            conversation_id,
            peer_user_id
        );

        let result = self.run_exchange(conversation_id, peer_user_id).await;
        guard.disarm();

        match result {
            Ok(peer) => {
                tracing::info!(
                    "Key exchange complete for {} (peer key {} v{})",
                    conversation_id,
                    peer.public_key.short_fingerprint(),
                    peer.version
                );
                self.set_state(conversation_id, ConversationState::Ready, Some(peer));
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Key exchange failed for {}: {}", conversation_id, e);
                self.conversation_keys.remove(conversation_id);
                self.set_state(
                    conversation_id,
                    ConversationState::Failed(FailureReason::from(&e)),
                    None,
                );
                Err(e)
            }
        }
    }

    async fn run_exchange(&self, conversation_id: &str, peer_user_id: &str) -> Result<PublishedKey> {
        let timeout = self.config.exchange_timeout();

        let published =
            tokio::time::timeout(timeout, self.directory.get_public_key(peer_user_id))
                .await
                .map_err(|_| {
                    Error::Timeout(format!(
                        "directory lookup for {} exceeded {:?}",
                        peer_user_id, timeout
                    ))
                })?
                .map_err(|e| match e {
                    Error::PeerKeyNotFound(_) | Error::Timeout(_) => e,
                    other => Error::KeyExchangeFailed(format!("directory lookup failed: {}", other)),
                })?;

        if self.config.verbose_logging {
            tracing::debug!(
                "Fetched key for {}: fingerprint {} version {}",
                peer_user_id,
                published.fingerprint,
                published.version
            );
        }

        let shared = self.key_pair.diffie_hellman(&published.public_key)?;
        let key = shared
            .derive_conversation_key(conversation_id)
            .map_err(|e| Error::KeyExchangeFailed(e.to_string()))?;

        self.conversation_keys.put(conversation_id, key);
        Ok(published)
    }

    fn is_ready_with(&self, conversation_id: &str, peer_user_id: &str) -> bool {
        let conversations = self.conversations.read();
        match conversations.get(conversation_id) {
            Some(entry) => {
                entry.state.is_ready()
                    && entry.peer.as_ref().map(|p| p.user_id.as_str()) == Some(peer_user_id)
                    && self.conversation_keys.contains(conversation_id)
            }
            None => false,
        }
    }

    fn set_state(
        &self,
        conversation_id: &str,
        state: ConversationState,
        peer: Option<PublishedKey>,
    ) {
        let mut conversations = self.conversations.write();
        let entry = conversations
            .entry(conversation_id.to_string())
            .or_insert(ConversationEntry {
                state: ConversationState::NoKey,
                peer: None,
            });
        entry.state = state;
        entry.peer = peer;
    }

    // ========================================================================
    // MESSAGES
    // ========================================================================

    /// Encrypt `plaintext` for `conversation_id`
    ///
    /// Fails with `NotReady` unless the conversation is `Ready`.
    pub fn encrypt_outgoing(&self, conversation_id: &str, plaintext: &str) -> Result<EncryptedMessage> {
        let key = self
            .ready_key(conversation_id)
            .ok_or_else(|| Error::NotReady(conversation_id.to_string()))?;

        crypto::encrypt(plaintext.as_bytes(), &key)
    }

    /// Decrypt a message received in `conversation_id`
    ///
    /// ## Errors
    ///
    /// - `NoConversationKey`: the conversation is not `Ready`
    /// - `DecryptionFailed`: the message did not authenticate
    /// - `UnsupportedVersion` / `UnsupportedAlgorithm` / `MalformedMessage`:
    ///   the wire fields are not a decryptable 2.0 message
    /// - `InvalidMessageContent`: the plaintext is not UTF-8
    ///
    /// A failure affects only this message; the conversation stays `Ready`.
    pub fn decrypt_incoming(&self, conversation_id: &str, message: &EncryptedMessage) -> Result<String> {
        let key = self
            .ready_key(conversation_id)
            .ok_or_else(|| Error::NoConversationKey(conversation_id.to_string()))?;

        let plaintext = crypto::decrypt_message(message, &key).map_err(|e| {
            if e.is_security_event() {
                tracing::warn!("Message in {} failed authentication", conversation_id);
            }
            e
        })?;

        String::from_utf8(plaintext).map_err(|_| {
            Error::InvalidMessageContent("decrypted message is not valid UTF-8".into())
        })
    }

    fn ready_key(&self, conversation_id: &str) -> Option<Arc<ConversationKey>> {
        if !self.is_ready(conversation_id) {
            return None;
        }
        self.conversation_keys.get(conversation_id)
    }

    /// Decrypt a message as delivered by a [`Transport`]
    pub fn receive(&self, incoming: &IncomingMessage) -> Result<String> {
        self.decrypt_incoming(&incoming.conversation_id, &incoming.message)
    }

    /// Encrypt `plaintext` and hand it to `transport`
    pub async fn send_text(
        &self,
        conversation_id: &str,
        plaintext: &str,
        transport: &dyn Transport,
    ) -> Result<EncryptedMessage> {
        let message = self.encrypt_outgoing(conversation_id, plaintext)?;
        transport.send(conversation_id, &message).await?;
        Ok(message)
    }

    // ========================================================================
    // VERIFICATION
    // ========================================================================

    /// Safety number for `conversation_id`
    ///
    /// Uses the peer key captured during the exchange, so both sides see the
    /// same number only if the directory gave each of them the real key.
    pub fn safety_number(&self, conversation_id: &str) -> Result<SafetyNumber> {
        let peer = self
            .peer_key(conversation_id)
            .ok_or_else(|| Error::NotReady(conversation_id.to_string()))?;

        Ok(SafetyNumber::compute(
            &self.public_key(),
            &peer.public_key,
            conversation_id,
        ))
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Drop the key for one conversation and return it to `NoKey`
    pub fn reset_conversation(&self, conversation_id: &str) {
        self.conversation_keys.remove(conversation_id);
        self.conversations.write().remove(conversation_id);
        tracing::debug!("Reset conversation {}", conversation_id);
    }

    /// Forget every conversation key
    ///
    /// The device key pair stays in storage.
    pub fn logout(&self) {
        self.conversation_keys.clear_all();
        self.conversations.write().clear();
        tracing::info!("Logged out {}", self.user_id);
    }

    /// Delete the device key pair and every conversation key
    pub fn forget_device(self) -> Result<()> {
        self.logout();
        self.key_pair_store.delete()?;
        tracing::info!("Removed all keys for {}", self.user_id);
        Ok(())
    }
}

/// Puts a conversation back to `NoKey` if an exchange is abandoned
struct ExchangeGuard<'a> {
    conversations: &'a RwLock<HashMap<String, ConversationEntry>>,
    conversation_id: &'a str,
    armed: bool,
}

impl<'a> ExchangeGuard<'a> {
    fn new(
        conversations: &'a RwLock<HashMap<String, ConversationEntry>>,
        conversation_id: &'a str,
    ) -> Self {
        Self {
            conversations,
            conversation_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let mut conversations = self.conversations.write();
        if let Some(entry) = conversations.get_mut(self.conversation_id) {
            if entry.state == ConversationState::Exchanging {
                tracing::debug!("Key exchange for {} abandoned", self.conversation_id);
                entry.state = ConversationState::NoKey;
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::transport::MemoryRelay;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    async fn open(user: &str, directory: &Arc<MemoryDirectory>) -> SecureSession {
        let directory: Arc<dyn Directory> = directory.clone();
        SecureSession::open(SessionConfig::default(), user, directory)
            .await
            .unwrap()
    }

    async fn ready_pair(conversation_id: &str) -> (SecureSession, SecureSession) {
        let directory = Arc::new(MemoryDirectory::new());
        let alice = open("alice", &directory).await;
        let bob = open("bob", &directory).await;

        alice.ensure_key_exchange(conversation_id, "bob").await.unwrap();
        bob.ensure_key_exchange(conversation_id, "alice").await.unwrap();
        (alice, bob)
    }

    /// Directory that never answers in time
    struct SlowDirectory;

    #[async_trait]
    impl Directory for SlowDirectory {
        async fn get_public_key(&self, user_id: &str) -> Result<PublishedKey> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(Error::PeerKeyNotFound(user_id.to_string()))
        }

        async fn get_key_version(&self, user_id: &str, _version: u64) -> Result<PublishedKey> {
            self.get_public_key(user_id).await
        }

        async fn publish(&self, user_id: &str, public_key: &PublicKey) -> Result<PublishedKey> {
            Ok(PublishedKey {
                user_id: user_id.to_string(),
                public_key: *public_key,
                version: 1,
                fingerprint: public_key.fingerprint(),
                published_at: 0,
            })
        }
    }

    /// Directory whose lookups fail until switched on
    struct FlakyDirectory {
        inner: MemoryDirectory,
        online: AtomicBool,
    }

    #[async_trait]
    impl Directory for FlakyDirectory {
        async fn get_public_key(&self, user_id: &str) -> Result<PublishedKey> {
            if !self.online.load(Ordering::SeqCst) {
                return Err(Error::TransportError("connection refused".into()));
            }
            self.inner.get_public_key(user_id).await
        }

        async fn get_key_version(&self, user_id: &str, version: u64) -> Result<PublishedKey> {
            self.inner.get_key_version(user_id, version).await
        }

        async fn publish(&self, user_id: &str, public_key: &PublicKey) -> Result<PublishedKey> {
            self.inner.publish(user_id, public_key).await
        }
    }

    /// Directory whose lookups hang once stalled
    struct StallingDirectory {
        inner: MemoryDirectory,
        stalled: AtomicBool,
    }

    #[async_trait]
    impl Directory for StallingDirectory {
        async fn get_public_key(&self, user_id: &str) -> Result<PublishedKey> {
            if self.stalled.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            self.inner.get_public_key(user_id).await
        }

        async fn get_key_version(&self, user_id: &str, version: u64) -> Result<PublishedKey> {
            self.inner.get_key_version(user_id, version).await
        }

        async fn publish(&self, user_id: &str, public_key: &PublicKey) -> Result<PublishedKey> {
            self.inner.publish(user_id, public_key).await
        }
    }

    #[tokio::test]
    async fn test_two_party_exchange() {
        let (alice, bob) = ready_pair("c1").await;

        assert_eq!(alice.state("c1"), ConversationState::Ready);
        assert_eq!(bob.state("c1"), ConversationState::Ready);

        let ka = alice.conversation_keys.get("c1").unwrap();
        let kb = bob.conversation_keys.get("c1").unwrap();
        assert_eq!(*ka, *kb);
    }

    #[tokio::test]
    async fn test_message_exchange() {
        let (alice, bob) = ready_pair("c1").await;

        let message = alice.encrypt_outgoing("c1", "hello bob").unwrap();
        assert_eq!(message.algorithm, "XSalsa20-Poly1305");
        assert_eq!(message.version, "2.0");

        assert_eq!(bob.decrypt_incoming("c1", &message).unwrap(), "hello bob");

        let reply = bob.encrypt_outgoing("c1", "hi alice").unwrap();
        assert_eq!(alice.decrypt_incoming("c1", &reply).unwrap(), "hi alice");
    }

    #[tokio::test]
    async fn test_message_exchange_over_relay() {
        let (alice, bob) = ready_pair("c1").await;
        let relay = MemoryRelay::new();
        let mut bob_inbox = relay.subscribe();

        let sent = alice.send_text("c1", "over the wire", &relay).await.unwrap();

        let incoming = bob_inbox.recv().await.unwrap();
        assert_eq!(incoming.message, sent);
        assert_eq!(bob.receive(&incoming).unwrap(), "over the wire");
    }

    #[tokio::test]
    async fn test_conversations_get_distinct_keys() {
        let directory = Arc::new(MemoryDirectory::new());
        let alice = open("alice", &directory).await;
        let bob = open("bob", &directory).await;

        alice.ensure_key_exchange("dm", "bob").await.unwrap();
        alice.ensure_key_exchange("group", "bob").await.unwrap();
        bob.ensure_key_exchange("dm", "alice").await.unwrap();

        assert_ne!(
            *alice.conversation_keys.get("dm").unwrap(),
            *alice.conversation_keys.get("group").unwrap()
        );

        // A message from one conversation does not open in the other
        let message = alice.encrypt_outgoing("group", "wrong room").unwrap();
        bob.ensure_key_exchange("group", "alice").await.unwrap();
        assert!(matches!(
            bob.decrypt_incoming("dm", &message),
            Err(Error::DecryptionFailed)
        ));
    }

    #[tokio::test]
    async fn test_encrypt_before_exchange_is_not_ready() {
        let directory = Arc::new(MemoryDirectory::new());
        let alice = open("alice", &directory).await;

        assert_eq!(alice.state("c1"), ConversationState::NoKey);
        assert!(matches!(
            alice.encrypt_outgoing("c1", "too early"),
            Err(Error::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_key_and_tampering_are_distinct() {
        let (alice, bob) = ready_pair("c1").await;
        let message = alice.encrypt_outgoing("c1", "hello").unwrap();

        // Conversation never exchanged
        assert!(matches!(
            bob.decrypt_incoming("other", &message),
            Err(Error::NoConversationKey(_))
        ));

        // Tampered ciphertext
        let mut tampered = message.clone();
        let mut bytes = tampered.ciphertext.into_bytes();
        bytes[0] = if bytes[0] == b'A' { b'B' } else { b'A' };
        tampered.ciphertext = String::from_utf8(bytes).unwrap();
        assert!(matches!(
            bob.decrypt_incoming("c1", &tampered),
            Err(Error::DecryptionFailed)
        ));

        // One bad message leaves the conversation usable
        assert!(bob.is_ready("c1"));
        assert_eq!(bob.decrypt_incoming("c1", &message).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_unknown_version_rejected() {
        let (alice, bob) = ready_pair("c1").await;
        let mut message = alice.encrypt_outgoing("c1", "hello").unwrap();
        message.version = "3.0".into();

        assert!(matches!(
            bob.decrypt_incoming("c1", &message),
            Err(Error::UnsupportedVersion(_))
        ));
    }

    #[tokio::test]
    async fn test_peer_without_key_fails() {
        let directory = Arc::new(MemoryDirectory::new());
        let alice = open("alice", &directory).await;

        let result = alice.ensure_key_exchange("c1", "ghost").await;
        assert!(matches!(result, Err(Error::PeerKeyNotFound(_))));

        match alice.state("c1") {
            ConversationState::Failed(reason) => {
                assert!(reason.requires_user_action);
                assert_eq!(reason.code, 201);
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert!(matches!(
            alice.encrypt_outgoing("c1", "x"),
            Err(Error::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_re_exchange_disables_messaging() {
        let (alice, bob) = ready_pair("c1").await;
        let from_bob = bob.encrypt_outgoing("c1", "still there?").unwrap();

        let result = alice.ensure_key_exchange("c1", "ghost").await;
        assert!(matches!(result, Err(Error::PeerKeyNotFound(_))));
        assert!(matches!(alice.state("c1"), ConversationState::Failed(_)));

        assert!(matches!(
            alice.encrypt_outgoing("c1", "to bob"),
            Err(Error::NotReady(_))
        ));
        assert!(matches!(
            alice.decrypt_incoming("c1", &from_bob),
            Err(Error::NoConversationKey(_))
        ));
        assert!(!alice.conversation_keys.contains("c1"));
        assert!(matches!(
            alice.safety_number("c1"),
            Err(Error::NotReady(_))
        ));

        // Retrying with the real peer restores the conversation
        alice.ensure_key_exchange("c1", "bob").await.unwrap();
        assert_eq!(alice.decrypt_incoming("c1", &from_bob).unwrap(), "still there?");
    }

    #[tokio::test]
    async fn test_abandoned_re_exchange_drops_old_key() {
        let stalling = Arc::new(StallingDirectory {
            inner: MemoryDirectory::new(),
            stalled: AtomicBool::new(false),
        });
        let directory: Arc<dyn Directory> = stalling.clone();

        let alice = SecureSession::open(SessionConfig::default(), "alice", directory.clone())
            .await
            .unwrap();
        let _bob = SecureSession::open(SessionConfig::default(), "bob", directory)
            .await
            .unwrap();
        alice.ensure_key_exchange("c1", "bob").await.unwrap();
        assert!(alice.encrypt_outgoing("c1", "before").is_ok());

        stalling.stalled.store(true, Ordering::SeqCst);
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            alice.ensure_key_exchange("c1", "carol"),
        )
        .await;
        assert!(abandoned.is_err());

        assert_eq!(alice.state("c1"), ConversationState::NoKey);
        assert!(!alice.conversation_keys.contains("c1"));
        assert!(matches!(
            alice.encrypt_outgoing("c1", "after"),
            Err(Error::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_low_order_peer_key_fails() {
        let directory = Arc::new(MemoryDirectory::new());
        let alice = open("alice", &directory).await;
        directory
            .publish("mallory", &PublicKey::from_bytes([0u8; 32]))
            .await
            .unwrap();

        let result = alice.ensure_key_exchange("c1", "mallory").await;
        assert!(matches!(result, Err(Error::KeyExchangeFailed(_))));
        assert!(matches!(alice.state("c1"), ConversationState::Failed(_)));
    }

    #[tokio::test]
    async fn test_failed_exchange_can_be_retried() {
        let flaky = Arc::new(FlakyDirectory {
            inner: MemoryDirectory::new(),
            online: AtomicBool::new(true),
        });
        let directory: Arc<dyn Directory> = flaky.clone();

        let alice = SecureSession::open(SessionConfig::default(), "alice", directory.clone())
            .await
            .unwrap();
        let _bob = SecureSession::open(SessionConfig::default(), "bob", directory)
            .await
            .unwrap();

        flaky.online.store(false, Ordering::SeqCst);
        let result = alice.ensure_key_exchange("c1", "bob").await;
        assert!(matches!(result, Err(Error::KeyExchangeFailed(_))));
        match alice.state("c1") {
            ConversationState::Failed(reason) => assert!(reason.recoverable),
            other => panic!("expected Failed, got {:?}", other),
        }

        flaky.online.store(true, Ordering::SeqCst);
        alice.ensure_key_exchange("c1", "bob").await.unwrap();
        assert!(alice.is_ready("c1"));
    }

    #[tokio::test]
    async fn test_directory_timeout() {
        let directory: Arc<dyn Directory> = Arc::new(SlowDirectory);
        let config = SessionConfig::default().with_exchange_timeout(Duration::from_millis(20));
        let alice = SecureSession::open(config, "alice", directory).await.unwrap();

        let result = alice.ensure_key_exchange("c1", "bob").await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert!(matches!(alice.state("c1"), ConversationState::Failed(_)));
    }

    #[tokio::test]
    async fn test_abandoned_exchange_returns_to_no_key() {
        let directory: Arc<dyn Directory> = Arc::new(SlowDirectory);
        let alice = SecureSession::open(SessionConfig::default(), "alice", directory)
            .await
            .unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            alice.ensure_key_exchange("c1", "bob"),
        )
        .await;

        assert!(abandoned.is_err());
        assert_eq!(alice.state("c1"), ConversationState::NoKey);
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let (alice, _bob) = ready_pair("c1").await;
        let before = alice.peer_key("c1").unwrap();

        alice.ensure_key_exchange("c1", "bob").await.unwrap();
        assert_eq!(alice.peer_key("c1").unwrap(), before);
        assert!(alice.is_ready("c1"));
    }

    #[tokio::test]
    async fn test_concurrent_exchanges() {
        let directory = Arc::new(MemoryDirectory::new());
        let alice = open("alice", &directory).await;
        let _bob = open("bob", &directory).await;
        let _carol = open("carol", &directory).await;

        let (r1, r2) = tokio::join!(
            alice.ensure_key_exchange("with-bob", "bob"),
            alice.ensure_key_exchange("with-carol", "carol"),
        );
        r1.unwrap();
        r2.unwrap();

        assert!(alice.is_ready("with-bob"));
        assert!(alice.is_ready("with-carol"));
        assert_eq!(alice.conversation_keys.len(), 2);
    }

    #[tokio::test]
    async fn test_safety_numbers_match() {
        let (alice, bob) = ready_pair("c1").await;

        let a = alice.safety_number("c1").unwrap();
        let b = bob.safety_number("c1").unwrap();
        assert_eq!(a.raw(), b.raw());
        assert!(b.verify(a.formatted()));

        assert!(matches!(
            alice.safety_number("unknown"),
            Err(Error::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_open_without_generation() {
        let directory: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let config = SessionConfig::default().with_generate_if_missing(false);

        let result = SecureSession::open(config, "alice", directory).await;
        assert!(matches!(result, Err(Error::NoLocalKeyPair)));
    }

    #[tokio::test]
    async fn test_reopen_keeps_key_pair() {
        let dir = tempfile::tempdir().unwrap();
        let directory = Arc::new(MemoryDirectory::new());
        let config = SessionConfig::default()
            .with_storage_path(dir.path())
            .with_storage_key([42u8; 32]);

        let first = {
            let d: Arc<dyn Directory> = directory.clone();
            SecureSession::open(config.clone(), "alice", d)
                .await
                .unwrap()
                .public_key()
        };

        let d: Arc<dyn Directory> = directory.clone();
        let reopened = SecureSession::open(config.with_generate_if_missing(false), "alice", d)
            .await
            .unwrap();
        assert_eq!(reopened.public_key(), first);
        assert_eq!(directory.get_public_key("alice").await.unwrap().version, 1);

        // The private key never reaches the disk in the clear
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let bytes = std::fs::read(entry.unwrap().path()).unwrap();
            let text = String::from_utf8_lossy(&bytes);
            assert!(!text.contains("privateKey"));
            assert!(!text.contains(&reopened.key_pair.public_key().to_base64()));
        }
    }

    #[tokio::test]
    async fn test_logout_clears_keys() {
        let (alice, _bob) = ready_pair("c1").await;

        alice.logout();
        assert_eq!(alice.state("c1"), ConversationState::NoKey);
        assert!(alice.conversation_keys.is_empty());
        assert!(matches!(
            alice.encrypt_outgoing("c1", "x"),
            Err(Error::NotReady(_))
        ));

        // The key pair survives: the exchange simply runs again
        alice.ensure_key_exchange("c1", "bob").await.unwrap();
        assert!(alice.is_ready("c1"));
    }

    #[tokio::test]
    async fn test_forget_device_removes_key_pair() {
        let store = Arc::new(SecureStore::new());
        let directory: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());

        let alice = SecureSession::open_with_store(
            SessionConfig::default(),
            "alice",
            store.clone(),
            directory.clone(),
        )
        .await
        .unwrap();
        alice.forget_device().unwrap();

        let config = SessionConfig::default().with_generate_if_missing(false);
        let result = SecureSession::open_with_store(config, "alice", store, directory).await;
        assert!(matches!(result, Err(Error::NoLocalKeyPair)));
    }

    #[tokio::test]
    async fn test_rotation_invalidates_old_messages() {
        let directory = Arc::new(MemoryDirectory::new());
        let alice = open("alice", &directory).await;
        let bob_store = Arc::new(SecureStore::new());
        let d: Arc<dyn Directory> = directory.clone();
        let bob = SecureSession::open_with_store(
            SessionConfig::default(),
            "bob",
            bob_store.clone(),
            d.clone(),
        )
        .await
        .unwrap();

        alice.ensure_key_exchange("c1", "bob").await.unwrap();
        bob.ensure_key_exchange("c1", "alice").await.unwrap();
        let old_message = alice.encrypt_outgoing("c1", "before rotation").unwrap();

        // Bob rotates: new pair persisted, new session republishes it
        KeyPairStore::new(bob_store.clone(), "bob")
            .generate_and_persist()
            .unwrap();
        let bob = SecureSession::open_with_store(SessionConfig::default(), "bob", bob_store, d)
            .await
            .unwrap();
        assert_eq!(directory.get_public_key("bob").await.unwrap().version, 2);

        alice.reset_conversation("c1");
        alice.ensure_key_exchange("c1", "bob").await.unwrap();
        bob.ensure_key_exchange("c1", "alice").await.unwrap();

        assert!(matches!(
            bob.decrypt_incoming("c1", &old_message),
            Err(Error::DecryptionFailed)
        ));

        let fresh = alice.encrypt_outgoing("c1", "after rotation").unwrap();
        assert_eq!(bob.decrypt_incoming("c1", &fresh).unwrap(), "after rotation");
    }

    #[tokio::test]
    async fn test_reset_conversation() {
        let (alice, _bob) = ready_pair("c1").await;

        alice.reset_conversation("c1");
        assert_eq!(alice.state("c1"), ConversationState::NoKey);
        assert!(alice.peer_key("c1").is_none());
    }
}
