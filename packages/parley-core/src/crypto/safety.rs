//! # Safety Numbers
//!
//! A human-comparable number both participants can read to each other out
//! of band. If it matches, nobody substituted a key in the directory.
//!
//! ```text
//! keys   = sort([base64(pk_a), base64(pk_b)])
//! digest = SHA-512(decode(keys[0]) || decode(keys[1]) || conversation_id)
//! n      = big-endian integer of digest[0..25], reduced mod 10^60
//! raw    = n as 60 decimal digits, zero-padded
//! shown  = raw in 12 groups of 5 digits separated by spaces
//! ```
//!
//! Sorting makes the result independent of which side computes it.

use std::fmt;

use sha2::{Digest, Sha512};

use super::keys::PublicKey;

/// Number of digest bytes folded into the number
const DIGEST_BYTES: usize = 25;

/// Digits per displayed group
const GROUP_SIZE: usize = 5;

/// Number of displayed groups
const GROUP_COUNT: usize = 12;

/// Total digits in a safety number
pub const SAFETY_NUMBER_DIGITS: usize = GROUP_SIZE * GROUP_COUNT;

/// Safety number for a pair of keys in one conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyNumber {
    raw: String,
    formatted: String,
    generated_at: i64,
}

impl SafetyNumber {
    /// Compute the safety number for two public keys and a conversation
    ///
    /// Symmetric in `a` and `b`. Always 60 digits, so it does not match
    /// the legacy web client for values at or above 10^60.
    pub fn compute(a: &PublicKey, b: &PublicKey, conversation_id: &str) -> Self {
        let (first, second) = if a.to_base64() <= b.to_base64() {
            (a, b)
        } else {
            (b, a)
        };

        let mut hasher = Sha512::new();
        hasher.update(first.as_bytes());
        hasher.update(second.as_bytes());
        hasher.update(conversation_id.as_bytes());
        let digest = hasher.finalize();

        let groups = decimal_groups(&digest[..DIGEST_BYTES]);
        let raw: String = groups.iter().map(|g| format!("{:05}", g)).collect();
        let formatted = groups
            .iter()
            .map(|g| format!("{:05}", g))
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            raw,
            formatted,
            generated_at: crate::time::now_timestamp_millis(),
        }
    }

    /// The 60 digits without separators
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Digits in groups of five
    pub fn formatted(&self) -> &str {
        &self.formatted
    }

    /// When this number was computed, unix millis
    pub fn generated_at(&self) -> i64 {
        self.generated_at
    }

    /// Compare against a number the user typed or scanned
    ///
    /// Whitespace is ignored, so both grouped and ungrouped input match.
    pub fn verify(&self, input: &str) -> bool {
        let digits: String = input.chars().filter(|c| !c.is_whitespace()).collect();
        digits == self.raw
    }
}

impl fmt::Display for SafetyNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formatted)
    }
}

/// Split a big-endian integer into base-100000 groups, most significant
/// first, keeping only the lowest `GROUP_COUNT` groups.
fn decimal_groups(bytes: &[u8]) -> [u32; GROUP_COUNT] {
    const BASE: u32 = 100_000;

    let mut number = bytes.to_vec();
    let mut groups = [0u32; GROUP_COUNT];

    for slot in groups.iter_mut().rev() {
        // Schoolbook division of `number` by BASE; remainder is the next group
        let mut remainder: u32 = 0;
        for byte in number.iter_mut() {
            let acc = (remainder << 8) | u32::from(*byte);
            *byte = (acc / BASE) as u8;
            remainder = acc % BASE;
        }
        *slot = remainder;
    }

    groups
}

// ============================================================================
// TESTS
// ============================================================================
