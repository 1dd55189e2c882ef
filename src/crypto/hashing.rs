//! License key generation and the one-way lookup hashes for keys and
//! device fingerprints.

use rand::Rng;
use sha2::{Digest, Sha256};

/// Uppercase letters and digits without the look-alikes 0/O and 1/I.
const KEY_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const KEY_GROUPS: usize = 4;
const KEY_GROUP_LEN: usize = 5;
const DEFAULT_INFIX: &str = "LIC";
const INFIX_MAX_LEN: usize = 4;

/// Generate a license key in the form `INFIX-XXXXX-XXXXX-XXXXX-XXXXX`.
///
/// The infix is derived from the plan code purely for operator readability;
/// the random groups carry 100 bits of entropy.
pub fn generate_license_key(plan_code: Option<&str>) -> String {
    let mut rng = rand::thread_rng();
    let mut part = || -> String {
        (0..KEY_GROUP_LEN)
            .map(|_| KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())] as char)
            .collect()
    };

    let mut key = key_infix(plan_code);
    for _ in 0..KEY_GROUPS {
        key.push('-');
        key.push_str(&part());
    }
    key
}

fn key_infix(plan_code: Option<&str>) -> String {
    let infix: String = plan_code
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(INFIX_MAX_LEN)
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if infix.is_empty() {
        DEFAULT_INFIX.to_string()
    } else {
        infix
    }
}

fn sha256_hex(domain: &[u8], value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Lookup hash for a license key. Keys are matched case-insensitively, so the
/// plaintext is trimmed and uppercased before hashing.
pub fn hash_license_key(plaintext: &str) -> String {
    let normalized = plaintext.trim().to_ascii_uppercase();
    sha256_hex(b"licensing-key-v1:", &normalized)
}

/// One-way hash of a raw device fingerprint, so raw hardware identifiers
/// are never stored.
pub fn hash_fingerprint(raw: &str) -> String {
    sha256_hex(b"licensing-fingerprint-v1:", raw.trim())
}
