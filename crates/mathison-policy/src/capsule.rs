// capsule.rs - Policy capsule and genome data model.
//
// A capsule is a signed JSON document issued by an external authority. It
// wraps three sections:
//
// - `treaty`: the governing treaty reference plus any extra prohibited actions.
//   Treaty prohibitions can only add to the built-in hard-deny set.
// - `genome`: the capability ceiling (allow/deny action lists), invariants,
//   lineage, and the authority that signs the genome itself.
// - `posture`: the deployment posture the capsule was issued for.
//
// Unknown fields anywhere are ignored; the sections listed above are required.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deployment posture. Development signatures are never accepted in production.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Posture {
    #[default]
    Production,
    Staging,
    Development,
}

impl Posture {
    pub fn is_production(&self) -> bool {
        matches!(self, Posture::Production)
    }
}

impl fmt::Display for Posture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Posture::Production => write!(f, "production"),
            Posture::Staging => write!(f, "staging"),
            Posture::Development => write!(f, "development"),
        }
    }
}

/// The top-level signed policy document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyCapsule {
    pub version: String,
    pub capsule_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub issuer: String,
    pub treaty: Treaty,
    pub genome: Genome,
    pub posture: Posture,
    pub signature: CapsuleSignature,
}

impl PolicyCapsule {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Signature over the capsule (canonical JSON without `signature`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapsuleSignature {
    /// `"ed25519"` for real signatures, `"dev"` for unsigned development capsules.
    pub alg: String,
    pub key_id: String,
    #[serde(default)]
    pub value: String,
}

impl CapsuleSignature {
    pub const ED25519: &'static str = "ed25519";
    pub const DEV: &'static str = "dev";

    pub fn is_dev(&self) -> bool {
        self.alg.eq_ignore_ascii_case(Self::DEV)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Treaty {
    pub treaty_id: String,
    #[serde(default)]
    pub version: String,
    /// Extra actions denied unconditionally, on top of the built-in set.
    #[serde(default)]
    pub prohibited_actions: Vec<String>,
}

/// The capability genome: what this deployment may ever do.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Genome {
    pub genome_id: String,
    #[serde(default)]
    pub name: String,
    pub version: String,
    /// Lineage: ids of the genomes this one was derived from.
    #[serde(default)]
    pub parents: Vec<String>,
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub invariants: Vec<Invariant>,
    pub authority: Authority,
    /// Ed25519 signatures by `authority.signers` over the genome without
    /// this field.
    #[serde(default)]
    pub signatures: Vec<GenomeSignature>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capability {
    pub cap_id: String,
    #[serde(default)]
    pub risk_class: String,
    #[serde(default)]
    pub allow_actions: Vec<String>,
    #[serde(default)]
    pub deny_actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invariant {
    pub id: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub testable_claim: String,
    #[serde(default)]
    pub enforcement: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Authority {
    pub signers: Vec<Signer>,
    pub threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Signer {
    pub key_id: String,
    /// Base64 raw Ed25519 public key (32 bytes).
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenomeSignature {
    pub key_id: String,
    pub value: String,
}

/// Outcome of checking one action against the capability ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CeilingDecision {
    /// Present in `allow_actions` of this capability and denied nowhere.
    Allowed { cap_id: String },
    /// Present in `deny_actions` of this capability. Deny wins over allow.
    Denied { cap_id: String },
    /// Absent from every allow list.
    NotFound,
}

impl CeilingDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, CeilingDecision::Allowed { .. })
    }

    /// Operator-facing reason for a denial (`None` when allowed).
    pub fn denial_reason(&self, action: &str) -> Option<String> {
        match self {
            CeilingDecision::Allowed { .. } => None,
            CeilingDecision::Denied { cap_id } => Some(format!(
                "Action '{}' explicitly denied by genome capability '{}'",
                action, cap_id
            )),
            CeilingDecision::NotFound => Some(format!(
                "Action '{}' not found in genome capability allow lists",
                action
            )),
        }
    }
}

impl Genome {
    /// Evaluate `action` against the capability ceiling.
    ///
    /// Every deny list is consulted before any allow list.
    pub fn check_action(&self, action: &str) -> CeilingDecision {
        if let Some(cap) = self
            .capabilities
            .iter()
            .find(|c| c.deny_actions.iter().any(|a| a == action))
        {
            return CeilingDecision::Denied {
                cap_id: cap.cap_id.clone(),
            };
        }
        match self
            .capabilities
            .iter()
            .find(|c| c.allow_actions.iter().any(|a| a == action))
        {
            Some(cap) => CeilingDecision::Allowed {
                cap_id: cap.cap_id.clone(),
            },
            None => CeilingDecision::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genome(caps: Vec<Capability>) -> Genome {
        Genome {
            genome_id: "g-1".to_string(),
            name: "test".to_string(),
            version: "1.0.0".to_string(),
            parents: vec![],
            capabilities: caps,
            invariants: vec![],
            authority: Authority {
                signers: vec![],
                threshold: 1,
            },
            signatures: vec![],
        }
    }

    fn cap(id: &str, allow: &[&str], deny: &[&str]) -> Capability {
        Capability {
            cap_id: id.to_string(),
            risk_class: "low".to_string(),
            allow_actions: allow.iter().map(|s| s.to_string()).collect(),
            deny_actions: deny.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn allow_listed_action_is_allowed() {
        let g = genome(vec![cap("CAP-READ", &["read_x"], &[])]);
        assert_eq!(
            g.check_action("read_x"),
            CeilingDecision::Allowed {
                cap_id: "CAP-READ".to_string()
            }
        );
    }

    #[test]
    fn unknown_action_is_not_found() {
        let g = genome(vec![cap("CAP-READ", &["read_x"], &[])]);
        let d = g.check_action("write_y");
        assert_eq!(d, CeilingDecision::NotFound);
        assert!(d
            .denial_reason("write_y")
            .unwrap()
            .contains("not found in genome capability allow lists"));
    }

    #[test]
    fn deny_wins_over_allow() {
        let g = genome(vec![
            cap("CAP-READ", &["read_x"], &[]),
            cap("CAP-LOCKDOWN", &[], &["read_x"]),
        ]);
        let d = g.check_action("read_x");
        assert_eq!(
            d,
            CeilingDecision::Denied {
                cap_id: "CAP-LOCKDOWN".to_string()
            }
        );
        assert!(d.denial_reason("read_x").unwrap().contains("explicitly denied"));
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let json = serde_json::json!({
            "cap_id": "CAP-1",
            "risk_class": "low",
            "allow_actions": ["a"],
            "future_field": {"nested": true}
        });
        let c: Capability = serde_json::from_value(json).unwrap();
        assert!(c.deny_actions.is_empty());
    }

    #[test]
    fn posture_parsing() {
        let p: Posture = serde_json::from_str("\"development\"").unwrap();
        assert_eq!(p, Posture::Development);
        assert!(!p.is_production());
        assert_eq!(Posture::default().to_string(), "production");
    }
}
