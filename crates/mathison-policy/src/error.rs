// error.rs - Error types for the policy capsule subsystem.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading or verifying a policy capsule.
///
/// Every variant leaves the loader in a fail-closed state: the capsule is
/// not installed and enforcement degrades rather than widening.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The capsule file does not exist.
    #[error("policy capsule not found at {}", path.display())]
    NotFound { path: PathBuf },

    /// The capsule file exists but could not be read.
    #[error("failed to read policy capsule {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON.
    #[error("malformed policy capsule {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    /// A required section is missing or has the wrong shape.
    #[error("policy capsule schema violation: {reason}")]
    Schema { reason: String },

    /// The capsule's `expires_at` has passed.
    #[error("policy capsule '{capsule_id}' expired at {expires_at}")]
    Expired {
        capsule_id: String,
        expires_at: String,
    },

    /// The capsule is signed by a key that is not in the trusted issuer set.
    #[error("policy capsule signed by untrusted issuer key '{key_id}'")]
    UntrustedIssuer { key_id: String },

    /// A signature did not verify.
    #[error("{what} signature invalid")]
    SignatureInvalid { what: String },

    /// A development (unsigned) capsule was presented where it is not allowed.
    #[error("development signature rejected in {posture} posture")]
    DevSignatureRejected { posture: String },

    /// The genome did not carry enough valid authority signatures.
    #[error("genome authority threshold not met: {valid} valid signature(s), {threshold} required")]
    AuthorityThreshold { valid: usize, threshold: u32 },

    /// A read-only allowlist entry is not a valid glob.
    #[error("invalid allowlist pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Canonicalization failed while computing a signature payload or hash.
    #[error("crypto error: {0}")]
    Crypto(#[from] mathison_crypto::CryptoError),
}
