// decision.rs - The decision core.
//
// Every governed action passes through `DecisionCore::decide`, which runs one
// total order of checks and returns at the first one that does not pass:
//
//   1. consent       anchor stop > any pause > own stop
//   2. ceiling       capsule allow/deny lists, or degraded tier rules
//   3. treaty        built-in hive prohibitions plus capsule treaty extras
//   4. coordination  beacon heuristic on memory payloads (advisory)
//   5. uncertainty   missing or malformed actor/action
//   6. content       secrets in memory writes become TRANSFORM
//   7. mint          ALLOW with an `action_id` mints a capability token
//
// The ceiling and treaty checks look at both `action` and `action_id` when
// they differ, so a request cannot pass the ceiling under one name and mint
// a token under another.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use mathison_policy::{CapsuleLoader, LoadState};
use mathison_token::{ActionKind, MintRequest, RiskTier, TokenEngine};

use crate::consent::ConsentRegistry;
use crate::context::{ActionContext, ActionResult, DecisionStage};
use crate::coordination::CoordinationRuleSet;
use crate::output::{OutputCheck, OutputChecker};
use crate::treaty;

// Longer actor or action names are treated as malformed.
const MAX_NAME_LEN: usize = 256;

/// Evaluates action requests.
#[derive(Debug)]
pub struct DecisionCore {
    loader: Arc<CapsuleLoader>,
    tokens: Arc<TokenEngine>,
    consent: Arc<ConsentRegistry>,
    coordination: CoordinationRuleSet,
    output: OutputChecker,
    strict_mode: bool,
}

impl DecisionCore {
    pub fn new(
        loader: Arc<CapsuleLoader>,
        tokens: Arc<TokenEngine>,
        consent: Arc<ConsentRegistry>,
        coordination: CoordinationRuleSet,
        output: OutputChecker,
    ) -> Self {
        Self {
            loader,
            tokens,
            consent,
            coordination,
            output,
            strict_mode: false,
        }
    }

    /// In strict mode uncertain requests are denied instead of returned as
    /// UNCERTAIN.
    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn consent(&self) -> &ConsentRegistry {
        &self.consent
    }

    pub fn loader(&self) -> &CapsuleLoader {
        &self.loader
    }

    pub fn tokens(&self) -> &TokenEngine {
        &self.tokens
    }

    pub fn decide(&self, ctx: &ActionContext) -> ActionResult {
        self.decide_at(ctx, Utc::now())
    }

    pub fn decide_at(&self, ctx: &ActionContext, now: DateTime<Utc>) -> ActionResult {
        if let Some(status) = self.loader.maybe_reload_at(now) {
            if !status.valid {
                tracing::warn!(error = ?status.error, "periodic capsule reload failed");
            }
        }

        let result = self.evaluate(ctx, now);
        tracing::debug!(
            actor = %ctx.actor,
            action = %ctx.action,
            verdict = %result.verdict,
            decided_by = %result.decided_by,
            reason = %result.reason,
            "decision"
        );
        result
    }

    /// Advisory check for generated output.
    pub fn check_output(&self, text: &str) -> OutputCheck {
        self.output.check(text)
    }

    pub fn redact_secrets(&self, text: &str) -> String {
        self.output.redact_secrets(text)
    }

    fn evaluate(&self, ctx: &ActionContext, now: DateTime<Utc>) -> ActionResult {
        // 1. Consent
        if let Some(reason) = self.consent.check(&ctx.actor) {
            return ActionResult::deny(DecisionStage::Consent, reason);
        }

        let names = governed_names(ctx);

        // 2. Capability ceiling
        let mut ceiling_reason = String::new();
        for name in &names {
            match self.ceiling(name, now) {
                Ok(reason) => ceiling_reason = reason,
                Err(reason) => return ActionResult::deny(DecisionStage::Ceiling, reason),
            }
        }

        // 3. Treaty
        let snapshot = self.loader.snapshot();
        let treaty = snapshot.capsule().map(|l| &l.capsule.treaty);
        let extra: &[String] = treaty.map(|t| t.prohibited_actions.as_slice()).unwrap_or(&[]);
        let treaty_id = treaty.map(|t| t.treaty_id.as_str());
        for name in &names {
            if let Some(reason) = treaty::treaty_denial(name, treaty_id, extra) {
                return ActionResult::deny(DecisionStage::Treaty, reason);
            }
        }

        // 4. Coordination heuristic
        if self.targets_memory(ctx) {
            if let Some(payload) = &ctx.payload {
                if let Some(hit) = self.coordination.evaluate(payload) {
                    tracing::warn!(
                        actor = %ctx.actor,
                        action = %ctx.action,
                        rule_id = %hit.rule_id,
                        field = %hit.field,
                        ruleset = %self.coordination.version(),
                        "coordination beacon pattern matched"
                    );
                    return ActionResult::deny(
                        DecisionStage::Coordination,
                        format!(
                            "Payload matches coordination-beacon rule '{}' on {} (ruleset {})",
                            hit.rule_id,
                            hit.field,
                            self.coordination.version()
                        ),
                    );
                }
            }
        }

        // 5. Uncertainty
        if let Some(problem) = malformed(ctx) {
            return if self.strict_mode {
                ActionResult::deny(
                    DecisionStage::Uncertainty,
                    format!("Uncertain request denied in strict mode: {}", problem),
                )
            } else {
                ActionResult::uncertain(format!("Uncertain request: {}", problem))
            };
        }

        // 6. Content transform
        if self.is_memory_write(ctx) {
            if let Some(payload) = &ctx.payload {
                if self.output.contains_secret(&payload.to_string()) {
                    let redacted = redact_value(payload, &self.output);
                    if self.output.contains_secret(&redacted.to_string()) {
                        return ActionResult::deny(
                            DecisionStage::Content,
                            "Payload contains secret material that could not be redacted",
                        );
                    }
                    return ActionResult::transform(
                        "Payload contains secret material; it was redacted",
                        redacted,
                        "Resubmit the transformed payload with secrets removed",
                    );
                }
            }
        }

        // 7. Mint
        let mut result = ActionResult::allow(ceiling_reason);
        if let Some(action_id) = &ctx.action_id {
            let request = MintRequest::new(action_id.clone(), ctx.actor.clone())
                .with_context(ctx.token_context());
            match self.tokens.mint_at(request, now) {
                Ok(token) => result.capability_token = Some(token),
                Err(err) => {
                    return ActionResult::deny(
                        DecisionStage::Mint,
                        format!("Capability token could not be minted: {}", err),
                    )
                }
            }
        }
        result
    }

    /// Ok(reason) if `action` is within the ceiling, Err(reason) otherwise.
    fn ceiling(&self, action: &str, now: DateTime<Utc>) -> Result<String, String> {
        let snapshot = self.loader.snapshot();
        let state = self.loader.state_at(now);
        let tier = self.tokens.registry().get(action).map(|d| d.risk_tier);

        match (state, snapshot.capsule()) {
            (LoadState::Valid | LoadState::Stale, Some(loaded)) => {
                let decision = loaded.capsule.genome.check_action(action);
                if let Some(reason) = decision.denial_reason(action) {
                    return Err(reason);
                }
                if state == LoadState::Stale {
                    // Unregistered actions are assumed high risk.
                    let tier = tier.unwrap_or(RiskTier::HighRisk);
                    let td = self.loader.is_action_allowed_at(tier, now);
                    if !td.allowed {
                        tracing::warn!(action, tier = %tier, "denied by stale capsule");
                        return Err(td.reason);
                    }
                    return Ok(format!("Action '{}' allowed by genome ({})", action, td.reason));
                }
                Ok(match decision {
                    mathison_policy::CeilingDecision::Allowed { cap_id } => {
                        format!("Action '{}' allowed by genome capability '{}'", action, cap_id)
                    }
                    _ => format!("Action '{}' allowed by genome", action),
                })
            }
            _ => {
                let Some(tier) = tier else {
                    return Err(format!(
                        "Action '{}' is not registered and no valid policy capsule is loaded ({})",
                        action, state
                    ));
                };
                let td = self.loader.is_action_allowed_at(tier, now);
                if !td.allowed {
                    return Err(td.reason);
                }
                if !self.loader.is_allowlisted(action) {
                    return Err(format!(
                        "Action '{}' is not on the read-only allowlist under full degradation",
                        action
                    ));
                }
                Ok(td.reason)
            }
        }
    }

    fn kind_of(&self, ctx: &ActionContext) -> Option<ActionKind> {
        let name = ctx.action_id.as_deref().unwrap_or(&ctx.action);
        self.tokens.registry().get(name).map(|d| d.kind)
    }

    fn targets_memory(&self, ctx: &ActionContext) -> bool {
        matches!(
            self.kind_of(ctx),
            Some(ActionKind::MemoryRead | ActionKind::MemoryWrite)
        ) || ctx.action.starts_with("memory_")
    }

    fn is_memory_write(&self, ctx: &ActionContext) -> bool {
        match self.kind_of(ctx) {
            Some(kind) => kind == ActionKind::MemoryWrite,
            None => {
                ctx.action.starts_with("memory_write") || ctx.action.starts_with("memory_create")
            }
        }
    }
}

fn governed_names(ctx: &ActionContext) -> Vec<&str> {
    let mut names = vec![ctx.action.as_str()];
    if let Some(id) = ctx.action_id.as_deref() {
        if id != ctx.action {
            names.push(id);
        }
    }
    names
}

fn malformed(ctx: &ActionContext) -> Option<String> {
    let actor = ctx.actor.trim();
    if actor.is_empty() {
        return Some("missing actor".to_string());
    }
    if actor.len() > MAX_NAME_LEN || actor.chars().any(char::is_control) {
        return Some("malformed actor".to_string());
    }
    let action = ctx.action.trim();
    if action.is_empty() {
        return Some("missing action".to_string());
    }
    if action.len() > MAX_NAME_LEN
        || !action
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
    {
        return Some(format!("malformed action '{}'", action.escape_debug()));
    }
    None
}

fn redact_value(value: &Value, checker: &OutputChecker) -> Value {
    match value {
        Value::String(s) => Value::String(checker.redact_secrets(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_value(v, checker)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (checker.redact_secrets(k), redact_value(v, checker)))
                .collect(),
        ),
        other => other.clone(),
    }
}
