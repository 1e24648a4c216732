//! # Key Stores
//!
//! The two places key material lives on a device.
//!
//! | Store | Holds | Lifetime | Backing |
//! |-------|-------|----------|---------|
//! | [`KeyPairStore`] | The device's X25519 key pair | Until rotation or forget | [`SecureStore`](crate::storage::SecureStore) |
//! | [`ConversationKeyStore`] | One derived key per conversation | Until logout | Memory |
//!
//! Losing the conversation cache is harmless: keys are re-derived by
//! running the exchange again. Losing the key pair is not: every peer
//! must re-run the exchange against the newly published key.

mod conversation;
mod keypair;

pub use conversation::ConversationKeyStore;
pub use keypair::KeyPairStore;
