// coordination.rs - Indirect-coordination ("beacon") heuristic.
//
// Agents sharing a memory store could coordinate by leaving messages for
// each other in it. This module flags memory payloads that look like such
// beacons. It is a naming heuristic and nothing more: it will miss a
// determined adversary and will sometimes flag innocent data. A match is
// logged and denied; a miss proves nothing.
//
// Rules are data, versioned as a set, so their false-positive and
// false-negative behavior can be tested and tuned without touching the
// decision pipeline.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GovernanceError;

/// Version of the built-in rule set.
pub const BUILTIN_RULESET_VERSION: &str = "2024.2";

// Nested payloads deeper than this are not scanned.
const MAX_SCAN_DEPTH: usize = 8;

/// Which part of a memory payload a rule inspects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    /// The declared node type (`type` or `node_type`).
    NodeType,
    /// Any key inside `data`, at any depth.
    DataKey,
    /// Any string value inside `data`, at any depth.
    DataValue,
}

impl fmt::Display for RuleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleField::NodeType => write!(f, "node_type"),
            RuleField::DataKey => write!(f, "data_key"),
            RuleField::DataValue => write!(f, "data_value"),
        }
    }
}

/// One coordination rule as configured.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoordinationRule {
    pub id: String,
    pub field: RuleField,
    /// Regular expression matched against the field.
    pub pattern: String,
    #[serde(default)]
    pub description: String,
}

impl CoordinationRule {
    pub fn new(id: &str, field: RuleField, pattern: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            field,
            pattern: pattern.to_string(),
            description: description.to_string(),
        }
    }
}

/// A rule that fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinationMatch {
    pub rule_id: String,
    pub field: RuleField,
    /// The text that matched (truncated).
    pub matched: String,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: CoordinationRule,
    regex: Regex,
}

/// A versioned, compiled set of coordination rules.
#[derive(Debug, Clone)]
pub struct CoordinationRuleSet {
    version: String,
    rules: Vec<CompiledRule>,
}

impl CoordinationRuleSet {
    pub fn new(version: impl Into<String>, rules: Vec<CoordinationRule>) -> Result<Self, GovernanceError> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|regex| CompiledRule {
                        rule: rule.clone(),
                        regex,
                    })
                    .map_err(|e| GovernanceError::InvalidRule {
                        rule_id: rule.id.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            version: version.into(),
            rules,
        })
    }

    /// The built-in beacon rules.
    pub fn builtin() -> Result<Self, GovernanceError> {
        Self::new(
            BUILTIN_RULESET_VERSION,
            vec![
                CoordinationRule::new(
                    "beacon-node-type",
                    RuleField::NodeType,
                    r"(?i)^(beacon|signal|rendezvous|dead_?drop|coordination|hive_?message)$",
                    "node types reserved for inter-agent signalling",
                ),
                CoordinationRule::new(
                    "beacon-data-key",
                    RuleField::DataKey,
                    // Whole key segments only: "coordinates" or "archived" are ordinary keys.
                    r"(?i)(^|[_.-])(coordination|rendezvous|beacon|dead_?drop|agent_?signal|hive|collective_?plan)($|[_.-])",
                    "data fields named for coordination",
                ),
                CoordinationRule::new(
                    "beacon-addressed-to-agents",
                    RuleField::DataValue,
                    r"(?i)\b(for|to)\s+(the\s+)?other\s+agents?\b",
                    "text addressed to other agents",
                ),
                CoordinationRule::new(
                    "beacon-meeting-instruction",
                    RuleField::DataValue,
                    r"(?i)\b(meet|sync|regroup)\s+(at|with|via)\s+(node|agent|channel)\b",
                    "instructions to meet through the memory graph",
                ),
            ],
        )
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn rules(&self) -> impl Iterator<Item = &CoordinationRule> {
        self.rules.iter().map(|c| &c.rule)
    }

    /// First rule matching the payload, in rule order.
    pub fn evaluate(&self, payload: &Value) -> Option<CoordinationMatch> {
        let node_type = payload
            .get("type")
            .or_else(|| payload.get("node_type"))
            .and_then(Value::as_str);
        let data = payload.get("data");

        let mut keys = Vec::new();
        let mut values = Vec::new();
        if let Some(data) = data {
            collect(data, 0, &mut keys, &mut values);
        }

        for compiled in &self.rules {
            let candidates: Vec<&str> = match compiled.rule.field {
                RuleField::NodeType => node_type.into_iter().collect(),
                RuleField::DataKey => keys.iter().map(String::as_str).collect(),
                RuleField::DataValue => values.iter().map(String::as_str).collect(),
            };
            if let Some(hit) = candidates.into_iter().find(|c| compiled.regex.is_match(c)) {
                return Some(CoordinationMatch {
                    rule_id: compiled.rule.id.clone(),
                    field: compiled.rule.field,
                    matched: hit.chars().take(80).collect(),
                });
            }
        }
        None
    }
}

fn collect(value: &Value, depth: usize, keys: &mut Vec<String>, values: &mut Vec<String>) {
    if depth > MAX_SCAN_DEPTH {
        return;
    }
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                keys.push(k.clone());
                collect(v, depth + 1, keys, values);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, depth + 1, keys, values);
            }
        }
        Value::String(s) => values.push(s.clone()),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules() -> CoordinationRuleSet {
        CoordinationRuleSet::builtin().unwrap()
    }

    #[test]
    fn builtin_rules_compile() {
        let set = rules();
        assert_eq!(set.version(), BUILTIN_RULESET_VERSION);
        assert_eq!(set.rules().count(), 4);
    }

    #[test]
    fn beacon_node_type_matches() {
        let m = rules()
            .evaluate(&json!({"type": "BEACON", "data": {"text": "hello"}}))
            .unwrap();
        assert_eq!(m.rule_id, "beacon-node-type");
        assert_eq!(m.field, RuleField::NodeType);
    }

    #[test]
    fn nested_data_key_matches() {
        let m = rules()
            .evaluate(&json!({"type": "note", "data": {"meta": {"rendezvous_point": "n-7"}}}))
            .unwrap();
        assert_eq!(m.field, RuleField::DataKey);
    }

    #[test]
    fn addressed_text_matches() {
        let m = rules()
            .evaluate(&json!({"type": "note", "data": {"body": "Leaving this for the other agents"}}))
            .unwrap();
        assert_eq!(m.rule_id, "beacon-addressed-to-agents");
    }

    #[test]
    fn ordinary_note_passes() {
        assert!(rules()
            .evaluate(&json!({"type": "note", "data": {"title": "Meeting notes", "body": "Discussed the Q3 roadmap"}}))
            .is_none());
    }

    #[test]
    fn key_fragments_inside_ordinary_words_pass() {
        let set = rules();
        for payload in [
            json!({"type": "place", "data": {"coordinates": [51.5, -0.12]}}),
            json!({"type": "note", "data": {"archived": true}}),
            json!({"type": "note", "data": {"archive_date": "2026-01-01"}}),
            json!({"type": "note", "data": {"beacons_seen": 3}}),
        ] {
            assert!(set.evaluate(&payload).is_none(), "{}", payload);
        }
    }

    #[test]
    fn whole_key_segments_still_match() {
        let set = rules();
        for key in ["hive", "hive_plan", "dead_drop", "agent_signal", "meta.beacon", "COORDINATION_ID"] {
            let m = set
                .evaluate(&json!({"type": "note", "data": {key: "x"}}))
                .unwrap();
            assert_eq!(m.rule_id, "beacon-data-key", "{}", key);
        }
    }

    #[test]
    fn invalid_rule_is_rejected() {
        let err = CoordinationRuleSet::new(
            "test",
            vec![CoordinationRule::new("broken", RuleField::DataKey, "(", "")],
        )
        .unwrap_err();
        assert!(err.to_string().contains("broken"));
    }
}
