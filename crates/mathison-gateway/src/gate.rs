// gate.rs - ActionGate: decide, then record the decision before answering.
//
// Every call appends exactly one receipt. The verdict is returned only after
// that receipt is durable; if the ledger write fails the caller gets an
// error instead of a verdict, so nothing proceeds unrecorded.

use std::sync::Arc;

use mathison_crypto::hasher;
use mathison_governance::{ActionContext, ActionResult, DecisionCore, OutputCheck, Verdict};
use mathison_receipts::{Decision, Receipt, ReceiptLedger};

use crate::error::GatewayError;

/// Receipt stage for gated action decisions.
pub const GATE_STAGE: &str = "ACTION_GATE";

/// Receipt stage for output checks.
pub const OUTPUT_STAGE: &str = "OUTPUT_CHECK";

/// Default `job_id` for gate receipts.
pub const DEFAULT_SESSION_ID: &str = "gate";

/// Front door for governed actions.
#[derive(Debug, Clone)]
pub struct ActionGate {
    decision: Arc<DecisionCore>,
    ledger: Arc<ReceiptLedger>,
    session_id: String,
}

impl ActionGate {
    pub fn new(decision: Arc<DecisionCore>, ledger: Arc<ReceiptLedger>) -> Self {
        Self {
            decision,
            ledger,
            session_id: DEFAULT_SESSION_ID.to_string(),
        }
    }

    /// Group this gate's receipts under `session_id` instead of "gate".
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Decide on `ctx` and record the decision.
    ///
    /// UNCERTAIN is recorded as a DENY receipt with `verdict=UNCERTAIN` in
    /// the notes; the caller still sees UNCERTAIN.
    pub fn evaluate(&self, ctx: &ActionContext) -> Result<ActionResult, GatewayError> {
        let result = self.decision.decide(ctx);
        let receipt = self.decision_receipt(ctx, &result)?;

        if let Err(e) = self.ledger.append(receipt) {
            tracing::error!(
                actor = %ctx.actor,
                action = %ctx.action,
                verdict = %result.verdict,
                error = %e,
                "receipt append failed, blocking action"
            );
            return Err(e.into());
        }
        Ok(result)
    }

    /// Like [`evaluate`](Self::evaluate), but anything other than ALLOW is an error.
    pub fn require(&self, ctx: &ActionContext) -> Result<ActionResult, GatewayError> {
        let result = self.evaluate(ctx)?;
        if result.is_allowed() {
            Ok(result)
        } else {
            Err(GatewayError::Denied {
                action: ctx.action.clone(),
                verdict: result.verdict,
                reason: result.reason,
            })
        }
    }

    /// Run the advisory output check and record it.
    pub fn check_output(&self, actor: &str, text: &str) -> Result<OutputCheck, GatewayError> {
        let check = self.decision.check_output(text);
        let decision = if check.allowed {
            Decision::Allow
        } else {
            Decision::Deny
        };
        let mut notes = format!("actor={}", actor);
        if !check.violations.is_empty() {
            notes.push_str(&format!(" violations={}", check.violations.join("; ")));
        }
        let receipt = self
            .with_policy(Receipt::new(&self.session_id, OUTPUT_STAGE, "output_check"))
            .with_inputs_hash(hasher::hash_str(text))
            .with_decision(decision)
            .with_notes(notes);
        self.ledger.append(receipt)?;
        if !check.allowed {
            tracing::warn!(actor, kinds = ?check.kinds, "output check flagged content");
        }
        Ok(check)
    }

    fn decision_receipt(
        &self,
        ctx: &ActionContext,
        result: &ActionResult,
    ) -> Result<Receipt, GatewayError> {
        let decision = match result.verdict {
            Verdict::Allow => Decision::Allow,
            Verdict::Transform => Decision::Transform,
            Verdict::Deny | Verdict::Uncertain => Decision::Deny,
        };
        let action = if ctx.action.is_empty() {
            "<missing>"
        } else {
            ctx.action.as_str()
        };

        let mut notes = format!(
            "verdict={} decided_by={} actor={} reason={}",
            result.verdict, result.decided_by, ctx.actor, result.reason
        );
        if let Some(token) = &result.capability_token {
            notes.push_str(&format!(" token_id={}", token.token_id));
        }

        let mut receipt = self
            .with_policy(Receipt::new(&self.session_id, GATE_STAGE, action))
            .with_inputs_hash(hasher::hash_canonical(ctx)?)
            .with_decision(decision)
            .with_notes(notes);

        if let Some(payload) = &result.transformed_payload {
            receipt = receipt.with_outputs_hash(hasher::hash_canonical(payload)?);
        } else if let Some(token) = &result.capability_token {
            receipt = receipt.with_outputs_hash(hasher::hash_canonical(token)?);
        }
        Ok(receipt)
    }

    // Stamp the receipt with the capsule and genome in force right now.
    fn with_policy(&self, receipt: Receipt) -> Receipt {
        let snapshot = self.decision.loader().snapshot();
        match snapshot.capsule() {
            Some(loaded) => receipt
                .with_policy_id(&loaded.capsule.capsule_id)
                .with_genome(&loaded.capsule.genome.genome_id, &loaded.capsule.genome.version),
            None => receipt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mathison_crypto::SigningKey;
    use mathison_governance::{ConsentRegistry, CoordinationRuleSet, OutputChecker};
    use mathison_policy::{CapsuleLoader, LoaderConfig};
    use mathison_receipts::store::StoredEntry;
    use mathison_receipts::{ReceiptBackend, ReceiptError};
    use mathison_token::{ActionRegistry, TokenEngine};

    struct FailingBackend;

    impl ReceiptBackend for FailingBackend {
        fn append(&mut self, _receipt: &Receipt) -> Result<(), ReceiptError> {
            Err(ReceiptError::WriteFailed(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }

        fn entries(&self) -> Result<Vec<StoredEntry>, ReceiptError> {
            Ok(Vec::new())
        }

        fn describe(&self) -> String {
            "failing".to_string()
        }
    }

    fn decision_core() -> Arc<DecisionCore> {
        let key = SigningKey::new(&[5u8; 32], "gate-test").unwrap();
        let tokens = TokenEngine::new(key, Arc::new(ActionRegistry::with_defaults()));
        Arc::new(DecisionCore::new(
            Arc::new(CapsuleLoader::new(LoaderConfig::default()).unwrap()),
            Arc::new(tokens),
            Arc::new(ConsentRegistry::new(Vec::<String>::new())),
            CoordinationRuleSet::builtin().unwrap(),
            OutputChecker::new().unwrap(),
        ))
    }

    fn chain_key() -> SigningKey {
        SigningKey::new(&[6u8; 32], "chain-test").unwrap()
    }

    #[test]
    fn ledger_failure_blocks_allowed_action() {
        let ledger = ReceiptLedger::new(Box::new(FailingBackend), chain_key());
        let gate = ActionGate::new(decision_core(), Arc::new(ledger));

        // Allowed under full degradation, but unrecordable.
        let ctx = ActionContext::new("agent-1", "memory_search").with_action_id("memory_search");
        let err = gate.evaluate(&ctx).unwrap_err();
        assert!(matches!(err, GatewayError::Receipt(ReceiptError::WriteFailed(_))));
    }

    #[test]
    fn every_decision_appends_one_receipt() {
        let (ledger, _backend) = ReceiptLedger::in_memory(chain_key());
        let ledger = Arc::new(ledger);
        let gate = ActionGate::new(decision_core(), ledger.clone()).with_session_id("session-9");

        let allowed = gate
            .evaluate(&ActionContext::new("agent-1", "memory_search"))
            .unwrap();
        assert_eq!(allowed.verdict, Verdict::Allow);
        let denied = gate
            .evaluate(&ActionContext::new("agent-1", "tool_invocation"))
            .unwrap();
        assert_eq!(denied.verdict, Verdict::Deny);

        let receipts = ledger.read_by_job("session-9").unwrap();
        assert_eq!(receipts.len(), 2);
        assert_eq!(receipts[0].decision, Some(Decision::Allow));
        assert_eq!(receipts[1].decision, Some(Decision::Deny));
        // No capsule loaded, so no policy stamp.
        assert!(receipts[0].policy_id.is_none());
    }

    #[test]
    fn require_turns_denial_into_error() {
        let (ledger, _backend) = ReceiptLedger::in_memory(chain_key());
        let gate = ActionGate::new(decision_core(), Arc::new(ledger));
        let err = gate
            .require(&ActionContext::new("agent-1", "tool_invocation"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Denied { verdict: Verdict::Deny, .. }));
    }

    #[test]
    fn missing_action_is_recorded_with_placeholder() {
        let (ledger, _backend) = ReceiptLedger::in_memory(chain_key());
        let ledger = Arc::new(ledger);
        let gate = ActionGate::new(decision_core(), ledger.clone());
        let result = gate.evaluate(&ActionContext::new("agent-1", "")).unwrap();
        assert_ne!(result.verdict, Verdict::Allow);
        assert_eq!(ledger.read_all().unwrap()[0].action, "<missing>");
    }
}
