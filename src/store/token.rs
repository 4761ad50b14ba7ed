//! Content-derived record tokens for optimistic concurrency.
//!
//! A token is a SHA-256 digest of the table name and every field of a
//! record. Writers present the token they read; a mismatch means the record
//! changed in between and the write is rejected.

use sha2::{Digest, Sha256};

use crate::model::Entity;

/// Computes record tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenHasher;

impl TokenHasher {
    /// Creates a new token hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the token of a record.
    ///
    /// The table kind is part of the digest so equal-looking records in
    /// different tables never share a token.
    #[must_use]
    pub fn token<E: Entity>(&self, record: &E) -> String {
        let mut hasher = Sha256::new();
        hasher.update(E::KIND.as_str().as_bytes());
        hasher.update([0u8]);
        record.digest(&mut hasher);
        hex::encode(hasher.finalize())
    }

    /// Computes a short token (first 8 characters) for display purposes.
    #[must_use]
    pub fn short(&self, token: &str) -> String {
        token.chars().take(8).collect()
    }

    /// Compares two tokens in constant time.
    #[must_use]
    pub fn tokens_match(presented: &str, current: &str) -> bool {
        if presented.len() != current.len() {
            return false;
        }

        presented
            .bytes()
            .zip(current.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::model::Network;

    fn lan() -> Network {
        Network {
            name: String::from("lan"),
            ip_addr: Ipv4Addr::new(10, 0, 0, 0),
            masklen: 8,
        }
    }

    #[test]
    fn test_token_deterministic() {
        let hasher = TokenHasher::new();
        assert_eq!(hasher.token(&lan()), hasher.token(&lan()));
        assert_eq!(hasher.token(&lan()).len(), 64);
    }

    #[test]
    fn test_token_follows_content() {
        let hasher = TokenHasher::new();
        let mut changed = lan();
        changed.masklen = 16;
        changed.ip_addr = Ipv4Addr::new(10, 1, 0, 0);

        assert_ne!(hasher.token(&lan()), hasher.token(&changed));
    }

    #[test]
    fn test_short_token() {
        let hasher = TokenHasher::new();
        assert_eq!(hasher.short("abcdef1234567890"), "abcdef12");
    }

    #[test]
    fn test_tokens_match() {
        assert!(TokenHasher::tokens_match("abc123", "abc123"));
        assert!(!TokenHasher::tokens_match("abc123", "abc124"));
        assert!(!TokenHasher::tokens_match("abc123", "abc12"));
    }
}
