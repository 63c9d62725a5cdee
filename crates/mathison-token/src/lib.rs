//! # mathison-token
//!
//! Short-lived, use-limited capability tokens for Mathison.
//!
//! A [`CapabilityToken`] proves that one specific registered action was
//! approved for one actor. The [`TokenEngine`] mints tokens after the
//! decision core says ALLOW, and every executor re-validates the token
//! before doing the side-effecting work.
//!
//! ## Key invariants
//!
//! - **Registered actions only**: minting an action id that is not in the
//!   [`ActionRegistry`] fails with `UNREGISTERED_ACTION`.
//! - **Signature covers everything**: the HMAC signature is computed over
//!   every field, `use_count` included, so editing any field invalidates it.
//! - **Use counts only move forward**: validate-and-increment returns a
//!   *new* token; the engine remembers the newest count per token id, so an
//!   older snapshot presented later is rejected as a replay.
//! - **Bound to one key**: tokens carry the `boot_key_id` of the key that
//!   signed them. A new key (rotation or an ephemeral key after restart)
//!   invalidates every outstanding token.

pub mod engine;
pub mod error;
pub mod registry;
pub mod token;

pub use engine::{TokenEngine, DEFAULT_TOKEN_TTL_MS};
pub use error::TokenError;
pub use registry::{ActionDefinition, ActionKind, ActionRegistry, RiskTier};
pub use token::{
    CapabilityToken, MintRequest, TokenContext, TokenValidation, TokenViolation, ValidateOptions,
};
