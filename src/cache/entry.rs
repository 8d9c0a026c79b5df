//! Validation of cached hash values.

/// Length of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

/// Check that `hash` is exactly 64 lowercase hexadecimal digits.
///
/// # Examples
///
/// ```
/// use s3deploy::cache::is_valid_hash;
///
/// assert!(is_valid_hash(&"a".repeat(64)));
/// assert!(!is_valid_hash(&"A".repeat(64)));
/// assert!(!is_valid_hash("abc"));
/// ```
#[must_use]
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == HASH_HEX_LEN && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
