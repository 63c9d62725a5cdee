// receipt.rs - The receipt record.
//
// A receipt has two groups of fields:
//
// - Business fields (timestamp, job, stage, action, hashes, decision, ...):
//   what happened. The content hash covers exactly these.
// - Chain fields (prev_hash, sequence_number, chain_signature): where it sits
//   in the ledger. Set by the ledger on append and excluded from the content
//   hash, so the hash never refers to itself.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use mathison_crypto::{canonical, hasher, CryptoError};

/// Fields set by the ledger, excluded from the content hash.
pub const CHAIN_FIELDS: &[&str] = &["prev_hash", "sequence_number", "chain_signature"];

/// The recorded outcome of a governed decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Deny,
    Transform,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => write!(f, "ALLOW"),
            Decision::Deny => write!(f, "DENY"),
            Decision::Transform => write!(f, "TRANSFORM"),
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ALLOW" => Ok(Decision::Allow),
            "DENY" => Ok(Decision::Deny),
            "TRANSFORM" => Ok(Decision::Transform),
            other => Err(format!("unknown decision '{}'", other)),
        }
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub timestamp: DateTime<Utc>,
    pub job_id: String,
    pub stage: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genome_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genome_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default)]
    pub prev_hash: String,
    #[serde(default)]
    pub sequence_number: u64,
    #[serde(default)]
    pub chain_signature: String,
}

impl Receipt {
    /// A new unchained receipt timestamped now.
    pub fn new(job_id: impl Into<String>, stage: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            job_id: job_id.into(),
            stage: stage.into(),
            action: action.into(),
            inputs_hash: None,
            outputs_hash: None,
            decision: None,
            policy_id: None,
            genome_id: None,
            genome_version: None,
            notes: None,
            prev_hash: String::new(),
            sequence_number: 0,
            chain_signature: String::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_inputs_hash(mut self, hash: impl Into<String>) -> Self {
        self.inputs_hash = Some(hash.into());
        self
    }

    pub fn with_outputs_hash(mut self, hash: impl Into<String>) -> Self {
        self.outputs_hash = Some(hash.into());
        self
    }

    pub fn with_decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn with_policy_id(mut self, policy_id: impl Into<String>) -> Self {
        self.policy_id = Some(policy_id.into());
        self
    }

    pub fn with_genome(mut self, genome_id: impl Into<String>, genome_version: impl Into<String>) -> Self {
        self.genome_id = Some(genome_id.into());
        self.genome_version = Some(genome_version.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// SHA-256 over the canonical business fields.
    pub fn content_hash(&self) -> Result<String, CryptoError> {
        let canonical = canonical::canonical_without(self, CHAIN_FIELDS)?;
        Ok(hasher::hash_str(&canonical))
    }
}

/// The bytes a chain signature covers.
pub fn chain_signing_payload(receipt_hash: &str, prev_hash: &str, sequence_number: u64) -> String {
    canonical::canonical_json(&json!({
        "receipt_hash": receipt_hash,
        "prev_hash": prev_hash,
        "sequence_number": sequence_number,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_ignores_chain_fields() {
        let mut r = Receipt::new("job-1", "LOAD", "STAGE_START");
        let before = r.content_hash().unwrap();
        r.prev_hash = "ab".repeat(32);
        r.sequence_number = 9;
        r.chain_signature = "sig".to_string();
        assert_eq!(r.content_hash().unwrap(), before);
    }

    #[test]
    fn content_hash_covers_business_fields() {
        let r = Receipt::new("job-1", "LOAD", "STAGE_START");
        let changed = r.clone().with_notes("edited");
        assert_ne!(r.content_hash().unwrap(), changed.content_hash().unwrap());
    }

    #[test]
    fn decision_parsing_is_case_insensitive() {
        assert_eq!("deny".parse::<Decision>().unwrap(), Decision::Deny);
        assert!("maybe".parse::<Decision>().is_err());
        assert_eq!(serde_json::to_string(&Decision::Transform).unwrap(), "\"TRANSFORM\"");
    }

    #[test]
    fn chain_payload_is_canonical() {
        assert_eq!(
            chain_signing_payload("h", "p", 3),
            r#"{"prev_hash":"p","receipt_hash":"h","sequence_number":3}"#
        );
    }

    #[test]
    fn optional_fields_survive_json() {
        let r = Receipt::new("job-1", "GATE", "memory_write_node")
            .with_decision(Decision::Allow)
            .with_genome("g-1", "1.0.0");
        let json = serde_json::to_string(&r).unwrap();
        assert!(!json.contains("outputs_hash"));
        let back: Receipt = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
        assert_eq!(back.content_hash().unwrap(), r.content_hash().unwrap());
    }
}
