//! Domain token hashing.
//!
//! Tokens are never stored or compared in the clear; every component that
//! touches a token (API auth, worker registration, dispatch candidate
//! filtering) works with the same SHA-256 hex digest.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of a domain token.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
