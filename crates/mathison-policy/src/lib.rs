//! # mathison-policy
//!
//! Loading, verification, and degraded-mode enforcement for the signed
//! policy capsule that seeds Mathison's decision core.
//!
//! A capsule carries a **genome**: a capability ceiling of allow/deny action
//! lists. The [`CapsuleLoader`] verifies the capsule (schema, expiry, issuer
//! signature, genome authority threshold) and serves it to readers as an
//! atomically swapped snapshot.
//!
//! When there is no valid capsule the loader still answers every question,
//! it just answers more conservatively:
//!
//! - No capsule, or an invalid one: only `read_only` actions.
//! - A stale capsule: no `high_risk` actions.
//!
//! Degradation only ever narrows what is allowed.

pub mod capsule;
pub mod error;
pub mod loader;
pub mod verify;

pub use capsule::{
    Authority, Capability, CapsuleSignature, CeilingDecision, Genome, GenomeSignature, Invariant,
    PolicyCapsule, Posture, Signer, Treaty,
};
pub use error::PolicyError;
pub use loader::{
    CapsuleLoader, CapsuleSnapshot, DegradationLevel, LoadState, LoadStatus, LoadedCapsule,
    LoaderConfig, LoaderStatus, TierDecision,
};
pub use verify::{Verification, VerifyPolicy};
