// error.rs - Error types for the receipt ledger.
//
// Integrity problems found while validating the chain are *not* errors; they
// are collected as `ChainViolation`s. These variants are for failures that
// stop an operation from completing at all.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReceiptError {
    /// Failed to open or create the ledger file.
    #[error("failed to open receipt ledger at {}: {source}", path.display())]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write or sync a receipt. The receipt is not durable.
    #[error("failed to append receipt: {0}")]
    WriteFailed(#[from] std::io::Error),

    /// Failed to serialize or deserialize a receipt.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored entry could not be parsed.
    #[error("corrupt receipt at index {index}: {reason}")]
    Corrupt { index: usize, reason: String },

    /// Hashing or signing failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] mathison_crypto::CryptoError),

    /// A previous append panicked mid-way; the chain head is no longer trusted.
    #[error("receipt ledger lock poisoned; refusing to append")]
    LockPoisoned,
}
