// verify.rs - Parsing and signature verification for policy capsules.
//
// Verification runs over the *raw* JSON document, not the typed struct, so
// fields this version does not know about are still covered by the
// signature. Two signatures are checked:
//
// 1. The capsule signature: Ed25519 by a trusted issuer key over the
//    canonical capsule without its `signature` field.
// 2. The genome authority: at least `authority.threshold` distinct signers
//    listed in the genome must have signed the canonical genome without its
//    `signatures` field.
//
// A development capsule (`signature.alg = "dev"`) skips both checks, but only
// when configuration allows it and neither the deployment nor the capsule is
// in production posture.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;

use mathison_crypto::{canonical, verify_ed25519};

use crate::capsule::{PolicyCapsule, Posture};
use crate::error::PolicyError;

/// Sections a capsule must carry; anything else is optional.
pub const REQUIRED_SECTIONS: &[&str] = &[
    "version",
    "capsule_id",
    "issued_at",
    "expires_at",
    "issuer",
    "treaty",
    "genome",
    "posture",
    "signature",
];

/// Who the loader trusts and how strict it is about signatures.
#[derive(Debug, Clone, Default)]
pub struct VerifyPolicy {
    /// Issuer key id to base64 Ed25519 public key.
    pub trusted_issuer_keys: BTreeMap<String, String>,
    /// Posture of this deployment (not of the capsule).
    pub posture: Posture,
    /// Accept development signatures outside production.
    pub allow_dev_signatures: bool,
}

/// Whether the accepted capsule was really signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Signed,
    DevAccepted,
}

/// Parse capsule text into its raw JSON and typed forms.
///
/// Malformed JSON and missing or mistyped required sections are reported as
/// distinct errors.
pub fn parse_capsule(path: &Path, text: &str) -> Result<(Value, PolicyCapsule), PolicyError> {
    let raw: Value = serde_json::from_str(text).map_err(|e| PolicyError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let object = raw.as_object().ok_or_else(|| PolicyError::Schema {
        reason: "capsule must be a JSON object".to_string(),
    })?;
    for section in REQUIRED_SECTIONS {
        if !object.contains_key(*section) {
            return Err(PolicyError::Schema {
                reason: format!("missing required section '{}'", section),
            });
        }
    }
    let capsule: PolicyCapsule =
        serde_json::from_value(raw.clone()).map_err(|e| PolicyError::Schema {
            reason: e.to_string(),
        })?;
    Ok((raw, capsule))
}

/// The bytes the capsule signature covers.
pub fn capsule_signing_payload(raw: &Value) -> Result<String, PolicyError> {
    Ok(canonical::canonical_without(raw, &["signature"])?)
}

/// The bytes each genome authority signature covers.
pub fn genome_signing_payload(raw_genome: &Value) -> Result<String, PolicyError> {
    Ok(canonical::canonical_without(raw_genome, &["signatures"])?)
}

/// Run every acceptance check except parsing.
pub fn verify_capsule(
    raw: &Value,
    capsule: &PolicyCapsule,
    policy: &VerifyPolicy,
    now: DateTime<Utc>,
) -> Result<Verification, PolicyError> {
    if capsule.is_expired_at(now) {
        return Err(PolicyError::Expired {
            capsule_id: capsule.capsule_id.clone(),
            expires_at: capsule.expires_at.to_rfc3339(),
        });
    }

    if capsule.signature.is_dev() {
        return accept_dev(capsule, policy);
    }

    let Some(public_key) = policy.trusted_issuer_keys.get(&capsule.signature.key_id) else {
        if dev_allowed(capsule, policy) {
            tracing::warn!(
                key_id = %capsule.signature.key_id,
                "accepting capsule from unknown issuer key in non-production posture"
            );
            return Ok(Verification::DevAccepted);
        }
        return Err(PolicyError::UntrustedIssuer {
            key_id: capsule.signature.key_id.clone(),
        });
    };

    let payload = capsule_signing_payload(raw)?;
    verify_ed25519(public_key, payload.as_bytes(), &capsule.signature.value).map_err(|_| {
        PolicyError::SignatureInvalid {
            what: "capsule".to_string(),
        }
    })?;

    verify_genome_authority(raw, capsule)?;
    Ok(Verification::Signed)
}

/// Check the genome's own authority signatures against its threshold.
pub fn verify_genome_authority(raw: &Value, capsule: &PolicyCapsule) -> Result<(), PolicyError> {
    let authority = &capsule.genome.authority;
    if authority.threshold == 0 {
        return Err(PolicyError::Schema {
            reason: "genome authority threshold must be at least 1".to_string(),
        });
    }
    let raw_genome = raw.get("genome").ok_or_else(|| PolicyError::Schema {
        reason: "missing required section 'genome'".to_string(),
    })?;
    let payload = genome_signing_payload(raw_genome)?;

    // Count distinct signers; a signer signing twice counts once.
    let mut valid_signers = BTreeSet::new();
    for sig in &capsule.genome.signatures {
        let Some(signer) = authority.signers.iter().find(|s| s.key_id == sig.key_id) else {
            continue;
        };
        if verify_ed25519(&signer.public_key, payload.as_bytes(), &sig.value).is_ok() {
            valid_signers.insert(sig.key_id.as_str());
        }
    }

    if valid_signers.len() < authority.threshold as usize {
        return Err(PolicyError::AuthorityThreshold {
            valid: valid_signers.len(),
            threshold: authority.threshold,
        });
    }
    Ok(())
}

fn dev_allowed(capsule: &PolicyCapsule, policy: &VerifyPolicy) -> bool {
    policy.allow_dev_signatures
        && !policy.posture.is_production()
        && !capsule.posture.is_production()
}

fn accept_dev(capsule: &PolicyCapsule, policy: &VerifyPolicy) -> Result<Verification, PolicyError> {
    if dev_allowed(capsule, policy) {
        tracing::warn!(
            capsule_id = %capsule.capsule_id,
            posture = %policy.posture,
            "accepting development-signed policy capsule"
        );
        return Ok(Verification::DevAccepted);
    }
    let posture = if capsule.posture.is_production() {
        capsule.posture
    } else {
        policy.posture
    };
    Err(PolicyError::DevSignatureRejected {
        posture: posture.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mathison_crypto::signing::encode_b64;
    use ring::rand::SystemRandom;
    use ring::signature::{Ed25519KeyPair, KeyPair};
    use serde_json::json;

    fn keypair() -> Ed25519KeyPair {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap()
    }

    fn unsigned(posture: &str, alg: &str, genome_pk: &str) -> Value {
        json!({
            "version": "1.0",
            "capsule_id": "cap-001",
            "issued_at": Utc::now().to_rfc3339(),
            "expires_at": (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
            "issuer": "mathison-authority",
            "treaty": {"treaty_id": "tiriti-o-te-kai", "version": "1.0"},
            "genome": {
                "genome_id": "g-1",
                "name": "base",
                "version": "1.0.0",
                "parents": [],
                "capabilities": [
                    {"cap_id": "CAP-MEM", "risk_class": "low", "allow_actions": ["memory_read_node"], "deny_actions": []}
                ],
                "invariants": [],
                "authority": {"signers": [{"key_id": "genome-key", "public_key": genome_pk}], "threshold": 1},
                "signatures": []
            },
            "posture": posture,
            "signature": {"alg": alg, "key_id": "issuer-1", "value": ""},
            "x_extension": {"ignored": true}
        })
    }

    fn sign(mut raw: Value, issuer: &Ed25519KeyPair, genome: &Ed25519KeyPair) -> Value {
        let gp = genome_signing_payload(&raw["genome"]).unwrap();
        raw["genome"]["signatures"] =
            json!([{"key_id": "genome-key", "value": encode_b64(genome.sign(gp.as_bytes()).as_ref())}]);
        let cp = capsule_signing_payload(&raw).unwrap();
        raw["signature"]["value"] = json!(encode_b64(issuer.sign(cp.as_bytes()).as_ref()));
        raw
    }

    fn policy_for(issuer: &Ed25519KeyPair) -> VerifyPolicy {
        let mut keys = BTreeMap::new();
        keys.insert(
            "issuer-1".to_string(),
            encode_b64(issuer.public_key().as_ref()),
        );
        VerifyPolicy {
            trusted_issuer_keys: keys,
            posture: Posture::Production,
            allow_dev_signatures: false,
        }
    }

    fn check(raw: &Value, policy: &VerifyPolicy) -> Result<Verification, PolicyError> {
        let (raw, capsule) = parse_capsule(Path::new("c.json"), &raw.to_string())?;
        verify_capsule(&raw, &capsule, policy, Utc::now())
    }

    #[test]
    fn signed_capsule_verifies() {
        let issuer = keypair();
        let genome = keypair();
        let raw = sign(
            unsigned("production", "ed25519", &encode_b64(genome.public_key().as_ref())),
            &issuer,
            &genome,
        );
        assert_eq!(check(&raw, &policy_for(&issuer)).unwrap(), Verification::Signed);
    }

    #[test]
    fn tampering_with_unknown_field_breaks_signature() {
        let issuer = keypair();
        let genome = keypair();
        let mut raw = sign(
            unsigned("production", "ed25519", &encode_b64(genome.public_key().as_ref())),
            &issuer,
            &genome,
        );
        raw["x_extension"]["ignored"] = json!(false);
        assert!(matches!(
            check(&raw, &policy_for(&issuer)),
            Err(PolicyError::SignatureInvalid { .. })
        ));
    }

    #[test]
    fn genome_threshold_enforced() {
        let issuer = keypair();
        let genome = keypair();
        let mut raw = unsigned("production", "ed25519", &encode_b64(genome.public_key().as_ref()));
        // Issuer signs, but nobody signs the genome.
        let cp = capsule_signing_payload(&raw).unwrap();
        raw["signature"]["value"] = json!(encode_b64(issuer.sign(cp.as_bytes()).as_ref()));
        assert!(matches!(
            check(&raw, &policy_for(&issuer)),
            Err(PolicyError::AuthorityThreshold {
                valid: 0,
                threshold: 1
            })
        ));
    }

    #[test]
    fn untrusted_issuer_rejected_in_production() {
        let issuer = keypair();
        let other = keypair();
        let genome = keypair();
        let raw = sign(
            unsigned("production", "ed25519", &encode_b64(genome.public_key().as_ref())),
            &issuer,
            &genome,
        );
        assert!(matches!(
            check(&raw, &policy_for(&other)),
            Err(PolicyError::SignatureInvalid { .. })
        ));
        let empty = VerifyPolicy::default();
        assert!(matches!(
            check(&raw, &empty),
            Err(PolicyError::UntrustedIssuer { .. })
        ));
    }

    #[test]
    fn dev_signature_only_outside_production() {
        let raw = unsigned("development", "dev", "");
        let mut policy = VerifyPolicy {
            posture: Posture::Development,
            allow_dev_signatures: true,
            ..Default::default()
        };
        assert_eq!(check(&raw, &policy).unwrap(), Verification::DevAccepted);

        policy.allow_dev_signatures = false;
        assert!(matches!(
            check(&raw, &policy),
            Err(PolicyError::DevSignatureRejected { .. })
        ));

        policy.allow_dev_signatures = true;
        policy.posture = Posture::Production;
        assert!(matches!(
            check(&raw, &policy),
            Err(PolicyError::DevSignatureRejected { .. })
        ));

        // A capsule issued for production is never accepted unsigned.
        let prod = unsigned("production", "dev", "");
        policy.posture = Posture::Development;
        assert!(matches!(
            check(&prod, &policy),
            Err(PolicyError::DevSignatureRejected { .. })
        ));
    }

    #[test]
    fn expired_capsule_rejected() {
        let mut raw = unsigned("development", "dev", "");
        raw["expires_at"] = json!((Utc::now() - chrono::Duration::minutes(1)).to_rfc3339());
        let policy = VerifyPolicy {
            posture: Posture::Development,
            allow_dev_signatures: true,
            ..Default::default()
        };
        assert!(matches!(
            check(&raw, &policy),
            Err(PolicyError::Expired { .. })
        ));
    }

    #[test]
    fn parse_errors_are_distinguished() {
        let path = Path::new("c.json");
        assert!(matches!(
            parse_capsule(path, "{not json"),
            Err(PolicyError::Malformed { .. })
        ));
        let mut raw = unsigned("development", "dev", "");
        raw.as_object_mut().unwrap().remove("genome");
        match parse_capsule(path, &raw.to_string()) {
            Err(PolicyError::Schema { reason }) => assert!(reason.contains("genome")),
            other => panic!("expected schema error, got {:?}", other.map(|_| ())),
        }
    }
}
