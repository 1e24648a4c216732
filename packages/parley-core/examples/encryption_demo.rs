//! # Encryption Demo
//!
//! Two users open sessions against a shared in-memory directory, run the
//! key exchange, and trade messages through an in-memory relay.
//!
//! ## Run
//!
//! ```bash
//! RUST_LOG=parley_core=debug cargo run --example encryption_demo
//! ```

use std::sync::Arc;

use parley_core::{
    Directory, Error, MemoryDirectory, MemoryRelay, SecureSession, SessionConfig, Transport,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== Parley Core: End-to-End Encryption Demo ===\n");

    // Step 1: Open a session per user; each generates and publishes a key
    println!("Step 1: Opening sessions for Alice and Bob...");
    let directory: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());

    let alice = SecureSession::open(SessionConfig::default(), "alice", directory.clone())
        .await
        .expect("Failed to open Alice's session");
    let bob = SecureSession::open(SessionConfig::default(), "bob", directory.clone())
        .await
        .expect("Failed to open Bob's session");

    println!("  Alice's public key: {}", alice.public_key().short_fingerprint());
    println!("  Bob's public key:   {}", bob.public_key().short_fingerprint());
    println!();

    // Step 2: Key exchange
    println!("Step 2: Running the key exchange for conversation \"general\"...");
    println!("  Alice state before: {:?}", alice.state("general"));

    alice
        .ensure_key_exchange("general", "bob")
        .await
        .expect("Alice's key exchange failed");
    bob.ensure_key_exchange("general", "alice")
        .await
        .expect("Bob's key exchange failed");

    println!("  Alice state after:  {:?}", alice.state("general"));
    println!("  Bob state after:    {:?}", bob.state("general"));
    println!();

    // Step 3: Alice sends through the relay
    println!("Step 3: Alice sends a message through the relay...");
    let relay = MemoryRelay::new();
    let mut bob_inbox = relay.subscribe();

    let sent = alice
        .send_text("general", "Hello Bob, this is end-to-end encrypted!", &relay)
        .await
        .expect("Failed to send");

    println!("  Wire message:");
    println!("{}", sent.to_json().expect("Failed to encode"));
    println!();

    // Step 4: Bob decrypts
    println!("Step 4: Bob receives and decrypts...");
    let incoming = bob_inbox.recv().await.expect("Relay closed");
    let plaintext = bob.receive(&incoming).expect("Failed to decrypt");
    println!("  Bob reads: \"{}\"", plaintext);
    println!();

    // Step 5: Tampering is detected
    println!("Step 5: A relay that flips a byte...");
    let mut tampered = sent.clone();
    tampered.ciphertext = tampered.ciphertext.replacen(
        &tampered.ciphertext[..1],
        if tampered.ciphertext.starts_with('A') { "B" } else { "A" },
        1,
    );
    match bob.decrypt_incoming("general", &tampered) {
        Err(Error::DecryptionFailed) => println!("  Rejected: message failed authentication"),
        other => println!("  Unexpected result: {:?}", other),
    }
    println!();

    // Step 6: Missing key vs. failure
    println!("Step 6: A message for a conversation Bob never joined...");
    match bob.decrypt_incoming("private", &sent) {
        Err(e) => println!("  {} (code {})", e, e.code()),
        Ok(_) => println!("  Unexpected success"),
    }
    println!();

    // Step 7: Peer without a key
    println!("Step 7: Exchange with a user who never published a key...");
    if let Err(e) = alice.ensure_key_exchange("ghost-chat", "ghost").await {
        println!("  {}", e);
    }
    println!("  State: {:?}", alice.state("ghost-chat"));
    println!();

    alice.logout();
    bob.logout();

    println!("=== Demo Complete ===");
}
