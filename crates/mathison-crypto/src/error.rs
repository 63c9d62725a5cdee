// error.rs - Error types for the crypto primitives.
//
// Uses `thiserror` to derive the standard Rust `Error` trait automatically.
// Each variant maps to a specific failure mode when loading keys, encoding
// signatures, or verifying them.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while hashing, signing, or verifying.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A signing secret is shorter than the minimum accepted length.
    #[error("signing key too short: {len} bytes, need at least {min}")]
    KeyTooShort { len: usize, min: usize },

    /// Failed to read a key file from disk.
    #[error("failed to read key file at {path}: {source}")]
    KeyFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A base64 field (key, signature, tag) could not be decoded.
    #[error("invalid base64 in {what}: {reason}")]
    Encoding { what: String, reason: String },

    /// The system random number generator failed.
    #[error("system randomness unavailable")]
    Randomness,

    /// An Ed25519 signature did not verify against the given public key.
    #[error("signature verification failed")]
    SignatureInvalid,

    /// Failed to serialize a record for canonicalization.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read a file for hashing.
    #[error("failed to hash file at {path}: {source}")]
    HashFileFailed {
        path: PathBuf,
        source: std::io::Error,
    },
}
