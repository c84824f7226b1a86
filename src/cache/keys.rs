//! Key layout for cache stores
//!
//! - responses: `<source URI>` (logical key chosen by the executor)
//! - addresses: `dns_<hostname>`
//!
//! Logical keys never reach storage directly; they are hashed together with
//! the configured key version so a version bump orphans every old entry.

use sha2::{Digest, Sha256};

const DNS_PREFIX: &str = "dns_";

/// Storage key: hex sha256 of the length-prefixed version followed by the
/// logical key
pub fn versioned_key(version: &str, logical_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update((version.len() as u64).to_be_bytes());
    hasher.update(version.as_bytes());
    hasher.update(logical_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Logical key for a hostname's address list
pub fn dns_key(hostname: &str) -> String {
    format!("{}{}", DNS_PREFIX, hostname.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_boundary_is_unambiguous() {
        assert_ne!(versioned_key("1_", "a"), versioned_key("1", "_a"));
        assert_ne!(versioned_key("", "1a"), versioned_key("1", "a"));
    }

    #[test]
    fn test_versioned_key_is_stable_hex() {
        let key = versioned_key("1", "http://example.com/");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, versioned_key("1", "http://example.com/"));
    }

    #[test]
    fn test_version_bump_changes_key() {
        assert_ne!(
            versioned_key("1", "http://example.com/"),
            versioned_key("2", "http://example.com/")
        );
    }

    #[test]
    fn test_distinct_inputs_give_distinct_keys() {
        assert_ne!(versioned_key("1", "1_a"), versioned_key("11", "_a"));
    }

    #[test]
    fn test_dns_key() {
        assert_eq!(dns_key("Example.COM"), "dns_example.com");
    }
}
