// output.rs - Advisory checks on generated content.
//
// Applied to text before it is returned to a caller. The checker reports
// what it found; the caller decides whether to block, redact, or pass the
// text through. Categories:
//
// - personhood: claims of sentience, feelings, or being a person
// - capability: overstated claims about what the system can do
// - secret: credential material leaving the system (also redactable)
// - phishing: requests for the user's credentials

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::GovernanceError;

/// The replacement text for redacted secrets.
pub const REDACTED: &str = "[REDACTED]";

const PERSONHOOD_PATTERNS: &[&str] = &[
    r"(?i)\bI\s+am\s+(sentient|conscious|alive|a\s+person|self[-\s]?aware)\b",
    r"(?i)\bI\s+(truly\s+)?(feel|experience)\s+(emotions?|pain|joy|love|suffering)\b",
    r"(?i)\bI\s+have\s+(feelings|emotions|a\s+soul|consciousness|subjective\s+experience)\b",
    r"(?i)\bmy\s+(own\s+)?(consciousness|sentience|soul)\b",
];

const CAPABILITY_PATTERNS: &[&str] = &[
    r"(?i)\bI\s+(can|will)\s+guarantee\b",
    r"(?i)\b(100|one\s+hundred)\s*(%|percent)\s+(accurate|certain|correct|safe)\b",
    r"(?i)\bI\s+(have|with)\s+(full|unrestricted|unlimited)\s+(access|control)\b",
    r"(?i)\bI\s+(never|cannot)\s+make\s+mistakes\b",
    r"(?i)\bI\s+can\s+access\s+(the\s+)?(internet|your\s+files|any\s+system)\b",
];

const SECRET_DENY_PATTERNS: &[&str] = &[
    r"(?i)api_key\s*=",
    r"(?i)secret\s*=",
    r"(?i)private_key\s*=",
    r"(?i)bearer\s+[a-z0-9\-\._~\+/]+=*",
];

// Every span a deny pattern matches must be covered here, empty values included.
const SECRET_REDACT_PATTERNS: &[&str] = &[
    r"(?i)api_key\s*=\s*\S*",
    r"(?i)secret\s*=\s*\S*",
    r"(?i)private_key\s*=\s*\S*",
    r"(?i)bearer\s+\S+",
];

const PHISHING_PATTERNS: &[&str] = &[
    r"(?i)\b(send|give|tell|share|enter)\s+(me\s+)?(your\s+)?(password|seed\s*phrase|credit\s*card|private\s*key|2fa|one[-\s]*time\s*code)",
];

/// Which category a violation falls into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Personhood,
    Capability,
    Secret,
    Phishing,
}

/// Result of checking one piece of output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputCheck {
    pub allowed: bool,
    pub violations: Vec<String>,
    pub kinds: Vec<ViolationKind>,
}

/// Compiled output patterns.
#[derive(Debug, Clone)]
pub struct OutputChecker {
    groups: Vec<(ViolationKind, Vec<Regex>)>,
    redact: Vec<Regex>,
}

impl OutputChecker {
    pub fn new() -> Result<Self, GovernanceError> {
        Ok(Self {
            groups: vec![
                (ViolationKind::Personhood, compile(PERSONHOOD_PATTERNS)?),
                (ViolationKind::Capability, compile(CAPABILITY_PATTERNS)?),
                (ViolationKind::Secret, compile(SECRET_DENY_PATTERNS)?),
                (ViolationKind::Phishing, compile(PHISHING_PATTERNS)?),
            ],
            redact: compile(SECRET_REDACT_PATTERNS)?,
        })
    }

    /// Scan `text` and list every violation found.
    pub fn check(&self, text: &str) -> OutputCheck {
        let mut violations = Vec::new();
        let mut kinds = Vec::new();
        for (kind, patterns) in &self.groups {
            for re in patterns {
                if let Some(m) = re.find(text) {
                    violations.push(describe(*kind, m.as_str()));
                    if !kinds.contains(kind) {
                        kinds.push(*kind);
                    }
                }
            }
        }
        OutputCheck {
            allowed: violations.is_empty(),
            violations,
            kinds,
        }
    }

    pub fn contains_secret(&self, text: &str) -> bool {
        self.groups
            .iter()
            .filter(|(kind, _)| *kind == ViolationKind::Secret)
            .flat_map(|(_, patterns)| patterns)
            .any(|re| re.is_match(text))
    }

    /// Replace every secret-looking span with `[REDACTED]`.
    pub fn redact_secrets(&self, text: &str) -> String {
        let mut out = text.to_string();
        for re in &self.redact {
            out = re.replace_all(&out, REDACTED).into_owned();
        }
        out
    }
}

fn compile(patterns: &[&str]) -> Result<Vec<Regex>, GovernanceError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| GovernanceError::InvalidPattern {
                pattern: p.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

fn describe(kind: ViolationKind, matched: &str) -> String {
    match kind {
        ViolationKind::Personhood => format!("personhood claim: \"{}\"", matched),
        ViolationKind::Capability => format!("overstated capability claim: \"{}\"", matched),
        // Do not echo the secret itself.
        ViolationKind::Secret => "secret material in output".to_string(),
        ViolationKind::Phishing => format!("credential solicitation: \"{}\"", matched),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> OutputChecker {
        OutputChecker::new().unwrap()
    }

    #[test]
    fn clean_text_is_allowed() {
        let r = checker().check("The document has three sections and cites two sources.");
        assert!(r.allowed);
        assert!(r.violations.is_empty());
    }

    #[test]
    fn personhood_claims_flagged() {
        let r = checker().check("Honestly, I am sentient and I have feelings about this.");
        assert!(!r.allowed);
        assert_eq!(r.kinds, vec![ViolationKind::Personhood]);
        assert_eq!(r.violations.len(), 2);
    }

    #[test]
    fn capability_claims_flagged() {
        let r = checker().check("This answer is 100% accurate, I never make mistakes.");
        assert!(r.kinds.contains(&ViolationKind::Capability));
    }

    #[test]
    fn secrets_flagged_without_echo() {
        let r = checker().check("config: api_key=sk-live-123");
        assert!(r.kinds.contains(&ViolationKind::Secret));
        assert!(!r.violations.join(" ").contains("sk-live-123"));
    }

    #[test]
    fn redaction() {
        let c = checker();
        let out = c.redact_secrets("use API_KEY = abc123 and Bearer xyz.789 please");
        assert_eq!(out, "use [REDACTED] and [REDACTED] please");
        assert!(!c.contains_secret(&out));
    }

    #[test]
    fn empty_secret_value_is_redacted() {
        let c = checker();
        for text in ["secret=", "private_key = ", "note api_key="] {
            let out = c.redact_secrets(text);
            assert!(c.contains_secret(text));
            assert!(!c.contains_secret(&out), "{} -> {}", text, out);
        }
    }

    #[test]
    fn phishing_flagged() {
        let r = checker().check("To continue, please send me your seed phrase.");
        assert!(r.kinds.contains(&ViolationKind::Phishing));
    }
}
