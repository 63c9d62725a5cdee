// error.rs - Error types for capability token operations.

use thiserror::Error;

use crate::token::TokenViolation;

/// Errors that can occur while minting or asserting capability tokens.
///
/// Ordinary validation failures are *not* errors: `TokenEngine::validate`
/// reports them as data so every violation surfaces at once. `TokenInvalid`
/// exists for callers that want a hard stop (`assert_valid`).
#[derive(Debug, Error)]
pub enum TokenError {
    /// The action id is not present in the action registry.
    #[error("UNREGISTERED_ACTION: action '{action_id}' is not registered")]
    UnregisteredAction { action_id: String },

    /// A token was requested with `max_use = 0`.
    #[error("invalid max_use {max_use}: a token must allow at least one use")]
    InvalidMaxUse { max_use: u32 },

    /// `now + ttl_ms` is not a representable time.
    #[error("invalid ttl_ms {ttl_ms}: expiry is out of range")]
    InvalidTtl { ttl_ms: i64 },

    /// No token was presented at all.
    #[error("TOKEN_MISSING: a capability token is required for this operation")]
    TokenMissing,

    /// The presented token failed one or more checks.
    #[error("TOKEN_INVALID: {}", join_violations(.errors))]
    TokenInvalid { errors: Vec<TokenViolation> },

    /// Canonicalization or key handling failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] mathison_crypto::CryptoError),
}

impl TokenError {
    /// Stable machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::UnregisteredAction { .. } => "UNREGISTERED_ACTION",
            TokenError::InvalidMaxUse { .. } => "INVALID_MAX_USE",
            TokenError::InvalidTtl { .. } => "INVALID_TTL",
            TokenError::TokenMissing => "TOKEN_MISSING",
            TokenError::TokenInvalid { .. } => "TOKEN_INVALID",
            TokenError::Crypto(_) => "CRYPTO_ERROR",
        }
    }
}

fn join_violations(errors: &[TokenViolation]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
