// error.rs - Error types for the decision core.
//
// Decisions themselves never fail: every problem becomes a DENY verdict with
// a reason. These errors only arise while constructing rule sets.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GovernanceError {
    /// A coordination rule's pattern is not a valid regex.
    #[error("invalid coordination rule '{rule_id}': {reason}")]
    InvalidRule { rule_id: String, reason: String },

    /// An output-check pattern is not a valid regex.
    #[error("invalid output pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}
