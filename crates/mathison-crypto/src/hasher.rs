// hasher.rs - SHA-256 hashing utilities.
//
// All content hashes in Mathison are SHA-256, hex-encoded. This module
// provides convenience functions for hashing bytes, strings, files, and
// canonicalized records.
//
// SHA-256 produces a 32-byte (256-bit) digest. We encode it as a 64-character
// lowercase hex string for readability and JSON compatibility.

use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::canonical;
use crate::error::CryptoError;

/// The `prev_hash` of the very first receipt in a chain: 64 zero hex chars.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Hash arbitrary bytes, returning a lowercase hex-encoded SHA-256 string.
///
/// This is deterministic: the same input always produces the same output.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    // `format!("{:x}", ...)` produces lowercase hex
    format!("{:x}", result)
}

/// Hash a UTF-8 string, returning a lowercase hex-encoded SHA-256 string.
pub fn hash_str(s: &str) -> String {
    hash_bytes(s.as_bytes())
}

/// Hash the canonical JSON form of any serializable record.
///
/// Field order in the Rust struct (or in a parsed JSON file) does not
/// matter: keys are sorted before hashing.
pub fn hash_canonical<T: Serialize + ?Sized>(record: &T) -> Result<String, CryptoError> {
    Ok(hash_str(&canonical::to_canonical_string(record)?))
}

/// Hash the contents of a file on disk.
pub fn hash_file(path: &Path) -> Result<String, CryptoError> {
    let data = std::fs::read(path).map_err(|source| CryptoError::HashFileFailed {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(hash_bytes(&data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_determinism() {
        let input = b"hello world";
        assert_eq!(hash_bytes(input), hash_bytes(input));
    }

    #[test]
    fn hash_uniqueness() {
        assert_ne!(hash_bytes(b"hello"), hash_bytes(b"world"));
    }

    #[test]
    fn hash_is_hex_encoded_sha256() {
        let hash = hash_str("test");
        assert_eq!(hash.len(), 64);
        assert!(hash
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn hash_known_value() {
        // SHA-256("") = e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
        assert_eq!(
            hash_str(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn genesis_hash_has_digest_shape() {
        assert_eq!(GENESIS_HASH.len(), 64);
        assert!(GENESIS_HASH.chars().all(|c| c == '0'));
    }

    #[test]
    fn canonical_hash_ignores_key_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"x":1,"y":{"b":2,"a":3}}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"y":{"a":3,"b":2},"x":1}"#).unwrap();
        assert_eq!(hash_canonical(&a).unwrap(), hash_canonical(&b).unwrap());
    }

    #[test]
    fn hash_file_reads_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.txt");
        std::fs::write(&path, "hello").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_str("hello"));
    }

    #[test]
    fn hash_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = hash_file(&dir.path().join("absent"));
        assert!(matches!(result, Err(CryptoError::HashFileFailed { .. })));
    }
}
