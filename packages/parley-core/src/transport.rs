//! # Transport
//!
//! Moves encrypted messages between participants without looking inside
//! them.
//!
//! ```text
//!  Alice's session                 Relay                   Bob's session
//!  ───────────────                 ─────                   ─────────────
//!  encrypt_outgoing ──► send(conv, msg) ──► frame ──► recv() ──► decrypt_incoming
//!                                   │
//!                                   └─► history (per conversation)
//! ```
//!
//! A frame is the JSON `{"conversationId": ..., "message": {...}}`. The
//! four message fields are carried as opaque strings and must arrive
//! exactly as they were sent.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::message::EncryptedMessage;

/// Default number of frames buffered per subscriber
const DEFAULT_CAPACITY: usize = 256;

/// A message delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    /// Conversation the message belongs to
    pub conversation_id: String,
    /// The encrypted payload, untouched
    pub message: EncryptedMessage,
}

/// Opaque relay for encrypted messages
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `message` to the other participants of `conversation_id`
    async fn send(&self, conversation_id: &str, message: &EncryptedMessage) -> Result<()>;

    /// Start receiving messages sent after this call
    fn subscribe(&self) -> Subscription;
}

/// Receiving end of a transport
pub struct Subscription {
    rx: broadcast::Receiver<String>,
}

impl Subscription {
    /// Wait for the next message
    ///
    /// Fails with `TransportError` if the relay shut down or this
    /// subscriber fell behind and frames were dropped.
    pub async fn recv(&mut self) -> Result<IncomingMessage> {
        let frame = match self.rx.recv().await {
            Ok(frame) => frame,
            Err(broadcast::error::RecvError::Closed) => {
                return Err(Error::TransportError("relay closed".into()))
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Subscriber lagged, {} frames dropped", n);
                return Err(Error::TransportError(format!("{} frames dropped", n)));
            }
        };

        serde_json::from_str(&frame)
            .map_err(|e| Error::TransportError(format!("undecodable frame: {}", e)))
    }
}

/// In-process fan-out relay
///
/// Every subscriber sees every frame. The newest `capacity` frames of each
/// conversation are also kept so late joiners can read the backlog.
pub struct MemoryRelay {
    tx: broadcast::Sender<String>,
    capacity: usize,
    history: RwLock<HashMap<String, VecDeque<String>>>,
}

impl MemoryRelay {
    /// Create a relay with the default buffer size
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a relay buffering up to `capacity` frames per subscriber and
    /// per conversation history
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            capacity,
            history: RwLock::new(HashMap::new()),
        }
    }

    /// Retained messages of `conversation_id`, oldest first
    pub fn history(&self, conversation_id: &str) -> Result<Vec<EncryptedMessage>> {
        self.raw_history(conversation_id)
            .iter()
            .map(|frame| -> Result<EncryptedMessage> {
                let incoming: IncomingMessage = serde_json::from_str(frame)?;
                Ok(incoming.message)
            })
            .collect()
    }

    /// The frames exactly as relayed
    pub fn raw_history(&self, conversation_id: &str) -> Vec<String> {
        self.history
            .read()
            .get(conversation_id)
            .map(|frames| frames.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryRelay {
    async fn send(&self, conversation_id: &str, message: &EncryptedMessage) -> Result<()> {
        let frame = serde_json::to_string(&IncomingMessage {
            conversation_id: conversation_id.to_string(),
            message: message.clone(),
        })
        .map_err(|e| Error::TransportError(format!("failed to encode frame: {}", e)))?;

        {
            let mut history = self.history.write();
            let frames = history.entry(conversation_id.to_string()).or_default();
            frames.push_back(frame.clone());
            while frames.len() > self.capacity {
                frames.pop_front();
            }
        }

        // No subscribers is not an error: the frame stays in history
        let delivered = self.tx.send(frame).unwrap_or(0);
        tracing::debug!(
            "Relayed message in {} to {} subscriber(s)",
            conversation_id,
            delivered
        );

        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
