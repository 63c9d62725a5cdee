// token.rs - Capability token data model.
//
// A token is a plain value. Nothing in this module mutates a token that a
// caller already holds: the engine's validate-and-increment produces a new
// token with a fresh signature and the caller replaces its working copy.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mathison_crypto::canonical;
use mathison_crypto::CryptoError;

/// Request metadata a token is bound to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenContext {
    pub route: Option<String>,
    pub method: Option<String>,
    pub request_hash: Option<String>,
}

/// A signed, use-limited grant for exactly one registered action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityToken {
    /// Unique identifier (UUID v4).
    pub token_id: String,
    /// The registered action this token permits.
    pub action_id: String,
    /// The actor the token was issued to.
    pub actor: String,
    pub issued_at: DateTime<Utc>,
    /// Hard cutoff: the token is expired once `now >= expires_at`.
    pub expires_at: DateTime<Utc>,
    /// How many times the token may be spent.
    pub max_use: u32,
    /// How many times it has been spent so far.
    pub use_count: u32,
    #[serde(default)]
    pub context: TokenContext,
    /// Id of the signing key (boot session) that issued this token.
    pub boot_key_id: String,
    /// Base64 HMAC-SHA256 over every other field.
    pub signature: String,
}

impl CapabilityToken {
    /// The exact bytes the signature covers: canonical JSON without `signature`.
    pub fn signing_payload(&self) -> Result<String, CryptoError> {
        canonical::canonical_without(self, &["signature"])
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_exhausted(&self) -> bool {
        self.use_count >= self.max_use
    }

    pub fn remaining_uses(&self) -> u32 {
        self.max_use.saturating_sub(self.use_count)
    }
}

/// Parameters for minting a token.
#[derive(Debug, Clone)]
pub struct MintRequest {
    pub action_id: String,
    pub actor: String,
    /// Time to live in milliseconds. Negative values mint an already-expired
    /// token (useful in tests). `None` uses the engine default.
    pub ttl_ms: Option<i64>,
    /// Defaults to 1 (single use).
    pub max_use: Option<u32>,
    pub context: Option<TokenContext>,
}

impl MintRequest {
    pub fn new(action_id: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            actor: actor.into(),
            ttl_ms: None,
            max_use: None,
            context: None,
        }
    }

    pub fn with_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn with_max_use(mut self, max_use: u32) -> Self {
        self.max_use = Some(max_use);
        self
    }

    pub fn with_context(mut self, context: TokenContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Options for `TokenEngine::validate`.
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    pub expected_action_id: Option<String>,
    pub expected_actor: Option<String>,
    /// Spend one use and return the re-signed token on success.
    pub increment_use: bool,
}

impl ValidateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_action(mut self, action_id: impl Into<String>) -> Self {
        self.expected_action_id = Some(action_id.into());
        self
    }

    pub fn expect_actor(mut self, actor: impl Into<String>) -> Self {
        self.expected_actor = Some(actor.into());
        self
    }

    pub fn increment(mut self) -> Self {
        self.increment_use = true;
        self
    }
}

/// One reason a token failed validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum TokenViolation {
    /// Signed under a different key than the engine's current key.
    BootKeyMismatch { expected: String, actual: String },
    /// Recomputed signature does not match the presented one.
    SignatureInvalid,
    Expired { expires_at: DateTime<Utc> },
    Exhausted { use_count: u32, max_use: u32 },
    ActionMismatch { expected: String, actual: String },
    ActorMismatch { expected: String, actual: String },
    /// A validly signed but outdated snapshot: the token has already been
    /// spent further than this copy shows.
    Replayed { presented: u32, current: u32 },
}

impl fmt::Display for TokenViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenViolation::BootKeyMismatch { expected, actual } => write!(
                f,
                "boot key mismatch: token signed under '{}', current key is '{}'",
                actual, expected
            ),
            TokenViolation::SignatureInvalid => write!(f, "signature invalid"),
            TokenViolation::Expired { expires_at } => {
                write!(f, "token expired at {}", expires_at.to_rfc3339())
            }
            TokenViolation::Exhausted { use_count, max_use } => write!(
                f,
                "token exhausted: use_count {} of max_use {}",
                use_count, max_use
            ),
            TokenViolation::ActionMismatch { expected, actual } => write!(
                f,
                "action mismatch: expected '{}', token grants '{}'",
                expected, actual
            ),
            TokenViolation::ActorMismatch { expected, actual } => write!(
                f,
                "actor mismatch: expected '{}', token issued to '{}'",
                expected, actual
            ),
            TokenViolation::Replayed { presented, current } => write!(
                f,
                "stale token replayed: presented use_count {}, current use_count {}",
                presented, current
            ),
        }
    }
}

/// The result of validating a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenValidation {
    pub valid: bool,
    /// Every violation found; validation does not stop at the first one.
    pub errors: Vec<TokenViolation>,
    /// The incremented, re-signed token (only when valid and `increment_use`).
    pub token: Option<CapabilityToken>,
}

impl TokenValidation {
    /// Violations rendered as human-readable strings.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }

    pub fn has(&self, predicate: impl Fn(&TokenViolation) -> bool) -> bool {
        self.errors.iter().any(predicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample() -> CapabilityToken {
        let now = Utc::now();
        CapabilityToken {
            token_id: "t-1".to_string(),
            action_id: "memory_write_node".to_string(),
            actor: "agent-1".to_string(),
            issued_at: now,
            expires_at: now + Duration::seconds(60),
            max_use: 2,
            use_count: 1,
            context: TokenContext::default(),
            boot_key_id: "key-1".to_string(),
            signature: "sig".to_string(),
        }
    }

    #[test]
    fn signing_payload_excludes_signature() {
        let mut a = sample();
        let payload = a.signing_payload().unwrap();
        assert!(!payload.contains("\"signature\""));
        a.signature = "different".to_string();
        assert_eq!(a.signing_payload().unwrap(), payload);
    }

    #[test]
    fn signing_payload_covers_use_count() {
        let a = sample();
        let mut b = sample();
        b.issued_at = a.issued_at;
        b.expires_at = a.expires_at;
        b.use_count = 2;
        assert_ne!(a.signing_payload().unwrap(), b.signing_payload().unwrap());
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let token = sample();
        assert!(token.is_expired_at(token.expires_at));
        assert!(!token.is_expired_at(token.expires_at - Duration::milliseconds(1)));
    }

    #[test]
    fn remaining_uses() {
        let token = sample();
        assert_eq!(token.remaining_uses(), 1);
        assert!(!token.is_exhausted());
    }

    #[test]
    fn violation_messages_are_specific() {
        let v = TokenViolation::Exhausted {
            use_count: 1,
            max_use: 1,
        };
        assert!(v.to_string().contains("exhausted"));
        let json = serde_json::to_string(&TokenViolation::SignatureInvalid).unwrap();
        assert!(json.contains("signature_invalid"));
    }
}
