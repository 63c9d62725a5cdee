// error.rs - Error types for the governed gateway.

use std::path::PathBuf;

use thiserror::Error;

use mathison_governance::Verdict;
use mathison_token::ActionKind;

/// Errors that can occur while booting the substrate or gating actions.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The configuration cannot produce a safe substrate. Fatal at boot.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// The config file could not be read.
    #[error("failed to read config at {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for `GovernanceConfig`.
    #[error("invalid config at {}: {reason}", path.display())]
    ConfigParse { path: PathBuf, reason: String },

    /// The gated action was not allowed; the receipt is already recorded.
    #[error("action '{action}' not allowed ({verdict}): {reason}")]
    Denied {
        action: String,
        verdict: Verdict,
        reason: String,
    },

    /// A token was presented to an executor for a different kind of operation.
    #[error("token for '{action_id}' is a {actual} token, executor requires {expected}")]
    KindMismatch {
        action_id: String,
        expected: ActionKind,
        actual: ActionKind,
    },

    /// A token names an action the registry does not know.
    #[error("action '{action_id}' is not registered")]
    UnknownAction { action_id: String },

    #[error("token error: {0}")]
    Token(#[from] mathison_token::TokenError),

    #[error("policy error: {0}")]
    Policy(#[from] mathison_policy::PolicyError),

    #[error("governance error: {0}")]
    Governance(#[from] mathison_governance::GovernanceError),

    /// The receipt ledger rejected an append or read. Gated actions do not
    /// proceed without a durable receipt.
    #[error("receipt error: {0}")]
    Receipt(#[from] mathison_receipts::ReceiptError),

    #[error("job error: {0}")]
    Job(#[from] mathison_jobs::JobError),

    #[error("crypto error: {0}")]
    Crypto(#[from] mathison_crypto::CryptoError),
}

impl GatewayError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        GatewayError::Config {
            reason: reason.into(),
        }
    }
}
