// context.rs - Action requests and decision results.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mathison_token::{CapabilityToken, TokenContext};

/// One request to perform a governed action.
///
/// Transient: built per request by the caller. `actor` and `action` default
/// to empty strings when absent so a malformed request still deserializes
/// and reaches the uncertainty check instead of failing upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionContext {
    #[serde(default)]
    pub actor: String,
    #[serde(default)]
    pub action: String,
    /// Registry id to mint a token for. No id, no token.
    #[serde(default)]
    pub action_id: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub genome_id: Option<String>,
    #[serde(default)]
    pub genome_version: Option<String>,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub request_hash: Option<String>,
}

impl ActionContext {
    pub fn new(actor: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn with_action_id(mut self, action_id: impl Into<String>) -> Self {
        self.action_id = Some(action_id.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_route(mut self, route: impl Into<String>, method: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self.method = Some(method.into());
        self
    }

    pub fn with_request_hash(mut self, request_hash: impl Into<String>) -> Self {
        self.request_hash = Some(request_hash.into());
        self
    }

    /// Request metadata to bind into a minted token.
    pub fn token_context(&self) -> TokenContext {
        TokenContext {
            route: self.route.clone(),
            method: self.method.clone(),
            request_hash: self.request_hash.clone(),
        }
    }
}

/// The outcome category of a decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Allow,
    Transform,
    Deny,
    Uncertain,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Allow => write!(f, "ALLOW"),
            Verdict::Transform => write!(f, "TRANSFORM"),
            Verdict::Deny => write!(f, "DENY"),
            Verdict::Uncertain => write!(f, "UNCERTAIN"),
        }
    }
}

/// Which step of the pipeline produced the verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStage {
    Consent,
    Ceiling,
    Treaty,
    Coordination,
    Content,
    Uncertainty,
    Mint,
    Passed,
}

impl fmt::Display for DecisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionStage::Consent => "consent",
            DecisionStage::Ceiling => "ceiling",
            DecisionStage::Treaty => "treaty",
            DecisionStage::Coordination => "coordination",
            DecisionStage::Content => "content",
            DecisionStage::Uncertainty => "uncertainty",
            DecisionStage::Mint => "mint",
            DecisionStage::Passed => "passed",
        };
        write!(f, "{}", s)
    }
}

/// The decision for one `ActionContext`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub verdict: Verdict,
    /// Specific, human-readable reason. Never empty.
    pub reason: String,
    pub decided_by: DecisionStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformed_payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_alternative: Option<String>,
    /// Present only when `verdict == Allow` and an `action_id` was given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_token: Option<CapabilityToken>,
}

impl ActionResult {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self::new(Verdict::Allow, DecisionStage::Passed, reason)
    }

    pub fn deny(stage: DecisionStage, reason: impl Into<String>) -> Self {
        Self::new(Verdict::Deny, stage, reason)
    }

    pub fn uncertain(reason: impl Into<String>) -> Self {
        Self::new(Verdict::Uncertain, DecisionStage::Uncertainty, reason)
    }

    pub fn transform(
        reason: impl Into<String>,
        transformed_payload: Value,
        suggested_alternative: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(Verdict::Transform, DecisionStage::Content, reason);
        result.transformed_payload = Some(transformed_payload);
        result.suggested_alternative = Some(suggested_alternative.into());
        result
    }

    fn new(verdict: Verdict, decided_by: DecisionStage, reason: impl Into<String>) -> Self {
        Self {
            verdict,
            reason: reason.into(),
            decided_by,
            transformed_payload: None,
            suggested_alternative: None,
            capability_token: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_alternative = Some(suggestion.into());
        self
    }

    pub fn is_allowed(&self) -> bool {
        self.verdict == Verdict::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_actor_deserializes_as_empty() {
        let ctx: ActionContext = serde_json::from_str(r#"{"action": "memory_read_node"}"#).unwrap();
        assert_eq!(ctx.actor, "");
        assert_eq!(ctx.action, "memory_read_node");
    }

    #[test]
    fn verdict_wire_format_is_upper_case() {
        assert_eq!(serde_json::to_string(&Verdict::Allow).unwrap(), "\"ALLOW\"");
        assert_eq!(Verdict::Uncertain.to_string(), "UNCERTAIN");
    }

    #[test]
    fn result_omits_empty_optionals() {
        let json = serde_json::to_value(ActionResult::deny(DecisionStage::Treaty, "no")).unwrap();
        assert!(json.get("capability_token").is_none());
        assert_eq!(json["decided_by"], "treaty");
    }
}
