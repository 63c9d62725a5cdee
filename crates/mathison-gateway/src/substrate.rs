// substrate.rs - Substrate: boot-time wiring of every governance component.
//
// Boot order:
//
//   1. validate config (fatal on error)
//   2. load chain key and token key (fatal on error)
//   3. build the action registry (built-ins + configured extras)
//   4. load the policy capsule (a bad or missing capsule degrades, never fatal)
//   5. open the receipt ledger and append a BOOT receipt (fatal on error)
//
// After boot the key material and registry are read-only.

use std::sync::Arc;

use serde_json::{json, Value};

use mathison_crypto::{hasher, SigningKey};
use mathison_governance::{
    ActionContext, ConsentRegistry, CoordinationRuleSet, DecisionCore, OutputChecker,
};
use mathison_jobs::{CheckpointStore, JobDefinition, JobOutcome, JobRunner};
use mathison_policy::{CapsuleLoader, LoadStatus};
use mathison_receipts::{Receipt, ReceiptLedger};
use mathison_token::{ActionKind, ActionRegistry, TokenEngine};

use crate::config::GovernanceConfig;
use crate::error::GatewayError;
use crate::executor::ExecutorGuard;
use crate::gate::ActionGate;

/// `job_id` and `stage` of the boot receipt.
pub const BOOT_JOB_ID: &str = "substrate";
pub const BOOT_STAGE: &str = "BOOT";

/// Action id under which jobs are gated.
pub const JOB_ACTION: &str = "job_run";

/// A booted governance substrate.
#[derive(Debug)]
pub struct Substrate {
    config: GovernanceConfig,
    registry: Arc<ActionRegistry>,
    loader: Arc<CapsuleLoader>,
    tokens: Arc<TokenEngine>,
    consent: Arc<ConsentRegistry>,
    decision: Arc<DecisionCore>,
    ledger: Arc<ReceiptLedger>,
    boot_status: LoadStatus,
    boot_receipt: Receipt,
}

impl Substrate {
    /// Boot from `config`. Refuses to start on any configuration error.
    pub fn boot(config: GovernanceConfig) -> Result<Self, GatewayError> {
        config.validate()?;

        let chain_key = load_chain_key(&config)?;
        let token_key = load_token_key(&config)?;

        let mut registry = ActionRegistry::with_defaults();
        for def in &config.actions {
            tracing::debug!(action_id = %def.action_id, kind = %def.kind, tier = %def.risk_tier, "registering action");
            registry.register(def.clone());
        }
        let registry = Arc::new(registry);

        let loader = Arc::new(CapsuleLoader::new(config.loader_config())?);
        let boot_status = match &config.capsule_path {
            Some(path) => loader.load_capsule(path),
            None => return Err(GatewayError::config("capsule_path is not configured")),
        };
        if !boot_status.valid {
            tracing::warn!(
                error = ?boot_status.error,
                degradation = %boot_status.degradation_level,
                "booting without a valid capsule; enforcement is degraded"
            );
        }

        let tokens = Arc::new(
            TokenEngine::new(token_key, registry.clone())
                .with_default_ttl_ms(config.default_token_ttl_ms),
        );
        let consent = Arc::new(ConsentRegistry::new(config.anchor_actors.iter().cloned()));
        let decision = Arc::new(
            DecisionCore::new(
                loader.clone(),
                tokens.clone(),
                consent.clone(),
                CoordinationRuleSet::builtin()?,
                OutputChecker::new()?,
            )
            .with_strict_mode(config.strict_mode),
        );

        let ledger = Arc::new(ReceiptLedger::open_jsonl(&config.receipts_path, chain_key)?);
        let tail = ledger.validate_tail(16)?;
        if !tail.valid {
            tracing::warn!(
                first_broken = ?tail.first_broken_index(),
                violations = tail.violations.len(),
                "receipt ledger tail does not verify"
            );
        }

        let boot_receipt = ledger.append(boot_receipt(&config, &loader, &tokens))?;
        tracing::info!(
            posture = %config.posture,
            token_key_id = tokens.key_id(),
            chain_key_id = ledger.key_id(),
            capsule_valid = boot_status.valid,
            sequence = boot_receipt.sequence_number,
            "substrate booted"
        );

        Ok(Self {
            config,
            registry,
            loader,
            tokens,
            consent,
            decision,
            ledger,
            boot_status,
            boot_receipt,
        })
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn loader(&self) -> &Arc<CapsuleLoader> {
        &self.loader
    }

    pub fn tokens(&self) -> &Arc<TokenEngine> {
        &self.tokens
    }

    pub fn consent(&self) -> &Arc<ConsentRegistry> {
        &self.consent
    }

    pub fn decision(&self) -> &Arc<DecisionCore> {
        &self.decision
    }

    pub fn ledger(&self) -> &Arc<ReceiptLedger> {
        &self.ledger
    }

    /// Result of the capsule load performed at boot.
    pub fn boot_status(&self) -> &LoadStatus {
        &self.boot_status
    }

    pub fn boot_receipt(&self) -> &Receipt {
        &self.boot_receipt
    }

    pub fn gate(&self) -> ActionGate {
        ActionGate::new(self.decision.clone(), self.ledger.clone())
    }

    pub fn executor(&self, kind: ActionKind) -> ExecutorGuard {
        ExecutorGuard::new(self.tokens.clone(), kind)
    }

    pub fn job_runner(&self) -> Result<JobRunner, GatewayError> {
        let store = CheckpointStore::new(&self.config.checkpoints_dir)?;
        Ok(JobRunner::new(store, self.ledger.clone()))
    }

    /// Gate a job run for `actor`, spend the token, then run (or resume) the job.
    pub fn run_job(
        &self,
        actor: &str,
        job_id: &str,
        definition: &JobDefinition,
        inputs: Value,
    ) -> Result<JobOutcome, GatewayError> {
        let ctx = ActionContext::new(actor, JOB_ACTION)
            .with_action_id(JOB_ACTION)
            .with_target(job_id)
            .with_payload(json!({
                "job_type": definition.job_type(),
                "inputs_hash": hasher::hash_canonical(&inputs)?,
            }));
        let result = self.gate().require(&ctx)?;
        self.executor(ActionKind::JobExecution)
            .authorize_actor(result.capability_token.as_ref(), actor)?;
        Ok(self.job_runner()?.run(job_id, definition, inputs)?)
    }
}

/// Load the receipt chain key named by `config`.
pub fn load_chain_key(config: &GovernanceConfig) -> Result<SigningKey, GatewayError> {
    let path = config
        .chain_key_path
        .as_deref()
        .ok_or_else(|| GatewayError::config("chain_key_path is not configured"))?;
    SigningKey::load(path).map_err(|e| {
        GatewayError::config(format!("chain key {}: {}", path.display(), e))
    })
}

/// Load the token key named by `config`, or generate one if configured as ephemeral.
pub fn load_token_key(config: &GovernanceConfig) -> Result<SigningKey, GatewayError> {
    if config.ephemeral_token_key {
        let key = SigningKey::ephemeral()?;
        tracing::info!(key_id = key.key_id(), "using ephemeral token key");
        return Ok(key);
    }
    let path = config
        .token_key_path
        .as_deref()
        .ok_or_else(|| GatewayError::config("token_key_path is not configured"))?;
    SigningKey::load(path).map_err(|e| {
        GatewayError::config(format!("token key {}: {}", path.display(), e))
    })
}

/// Open the configured receipt ledger without booting the rest of the substrate.
pub fn open_ledger(config: &GovernanceConfig) -> Result<ReceiptLedger, GatewayError> {
    let key = load_chain_key(config)?;
    Ok(ReceiptLedger::open_jsonl(&config.receipts_path, key)?)
}

fn boot_receipt(config: &GovernanceConfig, loader: &CapsuleLoader, tokens: &TokenEngine) -> Receipt {
    let snapshot = loader.snapshot();
    let capsule_hash = snapshot
        .capsule()
        .map(|c| c.capsule_hash.as_str())
        .unwrap_or("none");
    let notes = format!(
        "capsule_hash={} token_key_id={} posture={} degradation={}",
        capsule_hash,
        tokens.key_id(),
        config.posture,
        loader.status().degradation_level
    );
    let receipt = Receipt::new(BOOT_JOB_ID, BOOT_STAGE, "BOOT").with_notes(notes);
    match snapshot.capsule() {
        Some(loaded) => receipt
            .with_inputs_hash(&loaded.capsule_hash)
            .with_policy_id(&loaded.capsule.capsule_id)
            .with_genome(&loaded.capsule.genome.genome_id, &loaded.capsule.genome.version),
        None => receipt,
    }
}
