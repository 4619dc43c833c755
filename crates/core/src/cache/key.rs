//! Salted cache key derivation.
//!
//! The key is the cache's primary lookup unit and doubles as the artifact
//! file name, so it must be stable for a fixed salt and unguessable without
//! it (the serving endpoint uses the key to verify a request actually came
//! from rendered content).

use sha2::{Digest, Sha256};

/// Compute the cache key for a source URL under the given salt.
///
/// Deterministic for a fixed salt; rotating the salt yields unrelated keys,
/// orphaning any previously cached entries.
pub fn compute_key(url: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}
