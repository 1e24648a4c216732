//! # Safety Number Demo
//!
//! Shows how two users compare safety numbers out of band, and what a
//! directory that swaps keys looks like from each side.
//!
//! ## Run
//!
//! ```bash
//! cargo run --example safety_number_demo
//! ```

use parley_core::crypto::{KeyPair, SafetyNumber};

fn main() {
    println!("=== Parley Core: Safety Number Demo ===\n");

    let alice = KeyPair::generate().expect("Failed to generate Alice's key pair");
    let bob = KeyPair::generate().expect("Failed to generate Bob's key pair");
    let mallory = KeyPair::generate().expect("Failed to generate Mallory's key pair");

    // Step 1: Honest directory
    println!("Step 1: Both sides fetched the real keys...");
    let on_alice = SafetyNumber::compute(&alice.public_key(), &bob.public_key(), "general");
    let on_bob = SafetyNumber::compute(&bob.public_key(), &alice.public_key(), "general");

    println!("  Alice sees: {}", on_alice);
    println!("  Bob sees:   {}", on_bob);
    println!("  Match: {}", on_alice.verify(on_bob.formatted()));
    println!();

    // Step 2: Directory hands Alice Mallory's key instead of Bob's
    println!("Step 2: The directory substituted Bob's key for Alice...");
    let on_alice = SafetyNumber::compute(&alice.public_key(), &mallory.public_key(), "general");

    println!("  Alice sees: {}", on_alice);
    println!("  Bob sees:   {}", on_bob);
    println!("  Match: {}", on_alice.verify(on_bob.formatted()));
    println!();

    // Step 3: Numbers are per conversation
    println!("Step 3: Same users, different conversation...");
    let other = SafetyNumber::compute(&alice.public_key(), &bob.public_key(), "random");
    println!("  \"random\": {}", other);
    println!();

    println!("=== Demo Complete ===");
}
