// engine.rs - Minting and validating capability tokens.
//
// The engine owns the signing key (handed in at construction, never
// replaced) and a small use-tracking table. The table is what makes
// validate-and-increment atomic: a token id's latest use_count is recorded
// under a mutex, so two parallel validations of the same single-use token
// cannot both succeed, and an older snapshot presented after an increment is
// rejected as a replay.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use mathison_crypto::SigningKey;

use crate::error::TokenError;
use crate::registry::ActionRegistry;
use crate::token::{
    CapabilityToken, MintRequest, TokenValidation, TokenViolation, ValidateOptions,
};

/// Default token lifetime: 60 seconds.
pub const DEFAULT_TOKEN_TTL_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy)]
struct UseRecord {
    use_count: u32,
    expires_at: DateTime<Utc>,
}

/// Mints and validates capability tokens under one signing key.
#[derive(Debug)]
pub struct TokenEngine {
    key: SigningKey,
    registry: Arc<ActionRegistry>,
    default_ttl_ms: i64,
    uses: Mutex<HashMap<String, UseRecord>>,
}

impl TokenEngine {
    /// Create an engine bound to `key`. Every token it mints carries
    /// `key.key_id()` as its `boot_key_id`.
    pub fn new(key: SigningKey, registry: Arc<ActionRegistry>) -> Self {
        Self {
            key,
            registry,
            default_ttl_ms: DEFAULT_TOKEN_TTL_MS,
            uses: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.default_ttl_ms = ttl_ms;
        self
    }

    pub fn key_id(&self) -> &str {
        self.key.key_id()
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Mint a fresh token with `use_count = 0`.
    pub fn mint(&self, request: MintRequest) -> Result<CapabilityToken, TokenError> {
        self.mint_at(request, Utc::now())
    }

    /// Mint with an explicit clock (tests and replayable flows).
    pub fn mint_at(
        &self,
        request: MintRequest,
        now: DateTime<Utc>,
    ) -> Result<CapabilityToken, TokenError> {
        if !self.registry.contains(&request.action_id) {
            return Err(TokenError::UnregisteredAction {
                action_id: request.action_id,
            });
        }
        let max_use = request.max_use.unwrap_or(1);
        if max_use == 0 {
            return Err(TokenError::InvalidMaxUse { max_use });
        }

        let ttl_ms = request.ttl_ms.unwrap_or(self.default_ttl_ms);
        let expires_at = Duration::try_milliseconds(ttl_ms)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or(TokenError::InvalidTtl { ttl_ms })?;
        let mut token = CapabilityToken {
            token_id: uuid::Uuid::new_v4().to_string(),
            action_id: request.action_id,
            actor: request.actor,
            issued_at: now,
            expires_at,
            max_use,
            use_count: 0,
            context: request.context.unwrap_or_default(),
            boot_key_id: self.key.key_id().to_string(),
            signature: String::new(),
        };
        token.signature = self.key.sign(token.signing_payload()?.as_bytes());

        self.prune_expired(now);
        tracing::debug!(
            token_id = %token.token_id,
            action_id = %token.action_id,
            actor = %token.actor,
            max_use,
            "capability token minted"
        );
        Ok(token)
    }

    /// Validate a token, reporting every violation found.
    pub fn validate(&self, token: &CapabilityToken, opts: &ValidateOptions) -> TokenValidation {
        self.validate_at(token, opts, Utc::now())
    }

    /// Validate with an explicit clock.
    pub fn validate_at(
        &self,
        token: &CapabilityToken,
        opts: &ValidateOptions,
        now: DateTime<Utc>,
    ) -> TokenValidation {
        let mut errors = Vec::new();

        if token.boot_key_id != self.key.key_id() {
            errors.push(TokenViolation::BootKeyMismatch {
                expected: self.key.key_id().to_string(),
                actual: token.boot_key_id.clone(),
            });
        }

        let signature_ok = match token.signing_payload() {
            Ok(payload) => self.key.verify(payload.as_bytes(), &token.signature),
            Err(_) => false,
        };
        if !signature_ok {
            errors.push(TokenViolation::SignatureInvalid);
        }

        if token.is_expired_at(now) {
            errors.push(TokenViolation::Expired {
                expires_at: token.expires_at,
            });
        }

        if token.is_exhausted() {
            errors.push(TokenViolation::Exhausted {
                use_count: token.use_count,
                max_use: token.max_use,
            });
        }

        if let Some(expected) = &opts.expected_action_id {
            if &token.action_id != expected {
                errors.push(TokenViolation::ActionMismatch {
                    expected: expected.clone(),
                    actual: token.action_id.clone(),
                });
            }
        }

        if let Some(expected) = &opts.expected_actor {
            if &token.actor != expected {
                errors.push(TokenViolation::ActorMismatch {
                    expected: expected.clone(),
                    actual: token.actor.clone(),
                });
            }
        }

        if !errors.is_empty() {
            return TokenValidation {
                valid: false,
                errors,
                token: None,
            };
        }

        // Replay check and increment happen in one critical section.
        let mut uses = self.lock_uses();
        if let Some(record) = uses.get(&token.token_id) {
            if record.use_count > token.use_count {
                let current = record.use_count;
                drop(uses);
                tracing::warn!(
                    token_id = %token.token_id,
                    presented = token.use_count,
                    current,
                    "stale capability token replayed"
                );
                return TokenValidation {
                    valid: false,
                    errors: vec![TokenViolation::Replayed {
                        presented: token.use_count,
                        current,
                    }],
                    token: None,
                };
            }
        }

        if !opts.increment_use {
            return TokenValidation {
                valid: true,
                errors,
                token: None,
            };
        }

        let mut next = token.clone();
        next.use_count += 1;
        match next.signing_payload() {
            Ok(payload) => next.signature = self.key.sign(payload.as_bytes()),
            Err(_) => {
                return TokenValidation {
                    valid: false,
                    errors: vec![TokenViolation::SignatureInvalid],
                    token: None,
                }
            }
        }
        uses.insert(
            next.token_id.clone(),
            UseRecord {
                use_count: next.use_count,
                expires_at: next.expires_at,
            },
        );

        TokenValidation {
            valid: true,
            errors,
            token: Some(next),
        }
    }

    /// Hard-stop variant: missing or invalid tokens become errors.
    pub fn assert_valid(
        &self,
        token: Option<&CapabilityToken>,
        opts: &ValidateOptions,
    ) -> Result<TokenValidation, TokenError> {
        let token = token.ok_or(TokenError::TokenMissing)?;
        let validation = self.validate(token, opts);
        if validation.valid {
            Ok(validation)
        } else {
            Err(TokenError::TokenInvalid {
                errors: validation.errors,
            })
        }
    }

    // The table holds only counters; a panic elsewhere cannot leave it
    // half-written, so a poisoned lock is still safe to use.
    fn lock_uses(&self) -> MutexGuard<'_, HashMap<String, UseRecord>> {
        self.uses.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn prune_expired(&self, now: DateTime<Utc>) {
        self.lock_uses().retain(|_, record| record.expires_at > now);
    }
}
