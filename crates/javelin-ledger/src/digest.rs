//! SHA-256 digest primitive shared by the chain and by dedup fingerprints.
//!
//! The chain link rule is frozen: `hash = hex(SHA-256(prev || 0x00 || canonical))`
//! over the UTF-8 bytes of both fields. `prev` is either the genesis sentinel
//! or a lowercase hex digest, neither of which can contain a NUL byte, so the
//! separator makes the concatenation unambiguous. Changing this rule
//! invalidates every hash already stored.

use sha2::{Digest, Sha256};

/// Separator byte between the previous hash and the canonical payload.
pub const LINK_SEPARATOR: u8 = 0x00;

/// Lowercase hex SHA-256 of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Content fingerprint used for deduplication elsewhere in the system.
pub fn fingerprint(text: &str) -> String {
    sha256_hex(text.as_bytes())
}

/// Digest linking `canonical` onto a chain whose tail is `prev`.
pub fn link_digest(prev: &str, canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev.as_bytes());
    hasher.update([LINK_SEPARATOR]);
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}
