//! # mathison-governance
//!
//! The decision core: turns an [`ActionContext`] into a verdict
//! (ALLOW / TRANSFORM / DENY / UNCERTAIN) with a specific reason, and mints a
//! capability token on ALLOW.
//!
//! Checks run in one fixed order (consent, capability ceiling, treaty,
//! coordination heuristic, uncertainty, content, mint) and the first check
//! that does not pass decides. See [`decision`] for the details.
//!
//! The output checker ([`OutputChecker`]) is separate and advisory: it scans
//! generated text for personhood claims, overstated capability claims,
//! secrets, and credential solicitation.

pub mod consent;
pub mod context;
pub mod coordination;
pub mod decision;
pub mod error;
pub mod output;
pub mod treaty;

pub use consent::{ConsentRegistry, ConsentSignal};
pub use context::{ActionContext, ActionResult, DecisionStage, Verdict};
pub use coordination::{CoordinationMatch, CoordinationRule, CoordinationRuleSet, RuleField};
pub use decision::DecisionCore;
pub use error::GovernanceError;
pub use output::{OutputCheck, OutputChecker, ViolationKind};
