use std::fmt;

use sha2::{Digest, Sha512};

use crate::identity::IdentityKey;

const FINGERPRINT_VERSION: u16 = 0;
/// Iteration count of the hash chain; slows brute-force second-preimage
/// searches against the truncated digit encoding.
const ITERATIONS: usize = 5200;
const DIGITS_PER_CHUNK: usize = 5;
const CHUNKS_PER_SIDE: usize = 6;

/// Human-comparable 60-digit safety number derived from two identities.
///
/// Both parties compute the same value regardless of which side runs the
/// derivation, so it can be read aloud or scanned out of band.
#[derive(Clone, PartialEq, Eq)]
pub struct SafetyNumber {
    digits: String,
}

impl SafetyNumber {
    /// The raw 60-digit string.
    pub fn digits(&self) -> &str {
        &self.digits
    }

    /// Grouped in blocks of five for display.
    pub fn display_blocks(&self) -> String {
        self.digits
            .as_bytes()
            .chunks(DIGITS_PER_CHUNK)
            .map(|chunk| std::str::from_utf8(chunk).expect("digits are ASCII"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for SafetyNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.display_blocks())
    }
}

impl fmt::Debug for SafetyNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SafetyNumber({})", self.digits)
    }
}

/// Derives the safety number for the pair (local, remote).
///
/// The two halves are ordered lexicographically by stable identifier, so the
/// result is independent of which party computes it.
pub fn safety_number(
    local_identity: &IdentityKey,
    local_id: &str,
    remote_identity: &IdentityKey,
    remote_id: &str,
) -> SafetyNumber {
    let local_half = displayable_half(local_identity, local_id);
    let remote_half = displayable_half(remote_identity, remote_id);

    let digits = if (local_id, local_identity.serialize()) <= (remote_id, remote_identity.serialize())
    {
        local_half + &remote_half
    } else {
        remote_half + &local_half
    };
    SafetyNumber { digits }
}

/// 30 decimal digits for one (identity key, stable id) pair: an iterated
/// SHA-512 over the versioned input, truncated to six 5-byte chunks.
fn displayable_half(identity: &IdentityKey, stable_id: &str) -> String {
    let key_bytes = identity.serialize();

    let mut digest = Sha512::new()
        .chain_update(FINGERPRINT_VERSION.to_be_bytes())
        .chain_update(key_bytes)
        .chain_update(stable_id.as_bytes())
        .finalize();
    for _ in 1..ITERATIONS {
        digest = Sha512::new()
            .chain_update(digest)
            .chain_update(key_bytes)
            .finalize();
    }

    let mut digits = String::with_capacity(CHUNKS_PER_SIDE * DIGITS_PER_CHUNK);
    for chunk in digest[..CHUNKS_PER_SIDE * DIGITS_PER_CHUNK].chunks(DIGITS_PER_CHUNK) {
        let mut value = 0u64;
        for byte in chunk {
            value = (value << 8) | u64::from(*byte);
        }
        digits.push_str(&format!("{:05}", value % 100_000));
    }
    digits
}
