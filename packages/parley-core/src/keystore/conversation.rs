//! In-memory cache of derived conversation keys.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::crypto::ConversationKey;

/// Conversation id → derived key
///
/// Safe for concurrent use from several exchanges at once. Keys are
/// zeroized when the last reference is dropped.
#[derive(Default)]
pub struct ConversationKeyStore {
    keys: RwLock<HashMap<String, Arc<ConversationKey>>>,
}

impl ConversationKeyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache `key` for `conversation_id`, replacing any previous key
    pub fn put(&self, conversation_id: &str, key: ConversationKey) {
        self.keys
            .write()
            .insert(conversation_id.to_string(), Arc::new(key));
    }

    /// Look up the key for `conversation_id`
    pub fn get(&self, conversation_id: &str) -> Option<Arc<ConversationKey>> {
        self.keys.read().get(conversation_id).cloned()
    }

    /// Evict one conversation's key
    pub fn remove(&self, conversation_id: &str) -> bool {
        self.keys.write().remove(conversation_id).is_some()
    }

    /// Evict every key
    ///
    /// Call on logout so nothing carries over to the next user of the
    /// device.
    pub fn clear_all(&self) {
        let mut keys = self.keys.write();
        let count = keys.len();
        keys.clear();
        tracing::debug!("Cleared {} conversation key(s)", count);
    }

    /// Whether a key is cached for `conversation_id`
    pub fn contains(&self, conversation_id: &str) -> bool {
        self.keys.read().contains_key(conversation_id)
    }

    /// Number of cached keys
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}
