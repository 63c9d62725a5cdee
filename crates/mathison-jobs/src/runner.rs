// runner.rs - JobRunner: executes ordered stages with checkpoints and receipts.
//
// Each stage transition is persisted before the next stage begins:
//
//   STAGE_START receipt -> stage.run() -> checkpoint saved -> STAGE_COMPLETE receipt
//
// Re-running a job with the same id skips every stage already in
// `completed_stages`, so work done before a crash is never repeated. A crash
// between a checkpoint save and its completion receipt is repaired on the
// next run: missing STAGE_COMPLETE / JOB_COMPLETE receipts are appended,
// marked `recovered=true`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use mathison_crypto::hasher;
use mathison_receipts::{Receipt, ReceiptLedger};

use crate::checkpoint::{JobCheckpoint, JobStatus};
use crate::error::{JobError, StageError};
use crate::store::CheckpointStore;

/// Receipt stage label for job-level events.
pub const JOB_STAGE: &str = "JOB";

pub const ACTION_JOB_START: &str = "JOB_START";
pub const ACTION_JOB_RESUME: &str = "JOB_RESUME";
pub const ACTION_STAGE_START: &str = "STAGE_START";
pub const ACTION_STAGE_COMPLETE: &str = "STAGE_COMPLETE";
pub const ACTION_ERROR: &str = "ERROR";
pub const ACTION_JOB_COMPLETE: &str = "JOB_COMPLETE";

/// What a stage sees while it runs.
pub struct StageContext<'a> {
    pub job_id: &'a str,
    pub stage: &'a str,
    pub inputs: &'a Value,
    /// Outputs of stages completed so far, including those from earlier attempts.
    pub outputs: &'a BTreeMap<String, Value>,
    pub attempt: u32,
}

impl StageContext<'_> {
    pub fn output_of(&self, stage: &str) -> Option<&Value> {
        self.outputs.get(stage)
    }
}

/// One step of a job. Stages must be deterministic in their inputs and
/// prior outputs so a resumed job ends with the same outputs as an
/// uninterrupted one.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, ctx: &StageContext<'_>) -> Result<Value, StageError>;
}

/// A named, ordered list of stages.
pub struct JobDefinition {
    job_type: String,
    stages: Vec<Box<dyn Stage>>,
}

impl JobDefinition {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            stages: Vec::new(),
        }
    }

    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

/// Result of a finished job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: String,
    pub status: JobStatus,
    pub stage_outputs: BTreeMap<String, Value>,
    pub output_hashes: BTreeMap<String, String>,
    /// Output of the last stage.
    pub final_output: Option<Value>,
    pub attempts: u32,
    /// Stages skipped because an earlier attempt completed them.
    pub skipped_stages: Vec<String>,
}

impl JobOutcome {
    fn from_checkpoint(cp: &JobCheckpoint, skipped_stages: Vec<String>) -> Self {
        let final_output = cp
            .completed_stages
            .last()
            .and_then(|s| cp.stage_outputs.get(s))
            .cloned();
        Self {
            job_id: cp.job_id.clone(),
            status: cp.status,
            stage_outputs: cp.stage_outputs.clone(),
            output_hashes: cp.output_hashes.clone(),
            final_output,
            attempts: cp.attempts,
            skipped_stages,
        }
    }
}

/// Runs jobs against a checkpoint store, recording receipts in a ledger.
pub struct JobRunner {
    store: CheckpointStore,
    ledger: Arc<ReceiptLedger>,
}

impl JobRunner {
    pub fn new(store: CheckpointStore, ledger: Arc<ReceiptLedger>) -> Self {
        Self { store, ledger }
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<ReceiptLedger> {
        &self.ledger
    }

    /// Run or resume the job `job_id`.
    ///
    /// A completed job returns its recorded outcome without running any
    /// stage. A job that failed fatally returns [`JobError::AlreadyFailed`].
    pub fn run(
        &self,
        job_id: &str,
        definition: &JobDefinition,
        inputs: Value,
    ) -> Result<JobOutcome, JobError> {
        let inputs_hash = hasher::hash_canonical(&inputs)?;

        let mut cp = match self.store.load(job_id)? {
            None => {
                let cp = JobCheckpoint::new(job_id, definition.job_type(), inputs)?;
                self.store.save(&cp)?;
                self.record(
                    Receipt::new(job_id, JOB_STAGE, ACTION_JOB_START)
                        .with_inputs_hash(&inputs_hash)
                        .with_notes(format!("job_type={}", definition.job_type())),
                )?;
                tracing::info!(job_id, job_type = definition.job_type(), "job started");
                cp
            }
            Some(mut cp) => {
                if cp.job_type != definition.job_type() {
                    return Err(JobError::JobTypeMismatch {
                        job_id: job_id.to_string(),
                        expected: cp.job_type,
                        actual: definition.job_type().to_string(),
                    });
                }
                if cp.inputs_hash != inputs_hash {
                    return Err(JobError::InputsMismatch {
                        job_id: job_id.to_string(),
                        expected: cp.inputs_hash,
                        actual: inputs_hash,
                    });
                }
                match cp.status {
                    JobStatus::Completed => {
                        tracing::debug!(job_id, "job already complete");
                        self.recover_receipts(&cp, &inputs_hash)?;
                        return Ok(JobOutcome::from_checkpoint(&cp, Vec::new()));
                    }
                    JobStatus::Failed => {
                        return Err(JobError::AlreadyFailed {
                            job_id: job_id.to_string(),
                            error: cp.error.unwrap_or_default(),
                        });
                    }
                    JobStatus::Running | JobStatus::ResumableFailure => {}
                }
                cp.status = JobStatus::Running;
                cp.attempts += 1;
                cp.error = None;
                cp.updated_at = Utc::now();
                self.store.save(&cp)?;
                self.record(
                    Receipt::new(job_id, JOB_STAGE, ACTION_JOB_RESUME)
                        .with_inputs_hash(&inputs_hash)
                        .with_notes(format!(
                            "attempt={} completed={}",
                            cp.attempts,
                            cp.completed_stages.join(",")
                        )),
                )?;
                tracing::info!(
                    job_id,
                    attempt = cp.attempts,
                    completed = cp.completed_stages.len(),
                    "resuming job"
                );
                self.recover_receipts(&cp, &inputs_hash)?;
                cp
            }
        };

        let mut skipped = Vec::new();
        for stage in &definition.stages {
            let name = stage.name();
            if cp.is_stage_complete(name) {
                tracing::debug!(job_id, stage = name, "stage already complete, skipping");
                skipped.push(name.to_string());
                continue;
            }
            self.run_stage(&mut cp, stage.as_ref(), &inputs_hash)?;
        }

        cp.status = JobStatus::Completed;
        cp.current_stage = None;
        cp.completed_at = Some(Utc::now());
        cp.updated_at = Utc::now();
        self.store.save(&cp)?;
        self.record(
            Receipt::new(job_id, JOB_STAGE, ACTION_JOB_COMPLETE)
                .with_inputs_hash(&inputs_hash)
                .with_outputs_hash(cp.final_outputs_hash()?),
        )?;
        tracing::info!(job_id, attempts = cp.attempts, "job completed");

        Ok(JobOutcome::from_checkpoint(&cp, skipped))
    }

    fn run_stage(
        &self,
        cp: &mut JobCheckpoint,
        stage: &dyn Stage,
        inputs_hash: &str,
    ) -> Result<(), JobError> {
        let name = stage.name().to_string();
        cp.current_stage = Some(name.clone());
        cp.updated_at = Utc::now();
        self.store.save(cp)?;
        self.record(
            Receipt::new(&cp.job_id, &name, ACTION_STAGE_START).with_inputs_hash(inputs_hash),
        )?;
        tracing::debug!(job_id = %cp.job_id, stage = %name, "stage started");

        let result = {
            let ctx = StageContext {
                job_id: &cp.job_id,
                stage: &name,
                inputs: &cp.inputs,
                outputs: &cp.stage_outputs,
                attempt: cp.attempts,
            };
            stage.run(&ctx)
        };

        match result {
            Ok(output) => {
                let output_hash = cp.record_stage(&name, output)?;
                self.store.save(cp)?;
                self.record(
                    Receipt::new(&cp.job_id, &name, ACTION_STAGE_COMPLETE)
                        .with_inputs_hash(inputs_hash)
                        .with_outputs_hash(output_hash),
                )?;
                tracing::debug!(job_id = %cp.job_id, stage = %name, "stage complete");
                Ok(())
            }
            Err(err) => {
                cp.status = if err.is_fatal() {
                    JobStatus::Failed
                } else {
                    JobStatus::ResumableFailure
                };
                cp.error = Some(err.to_string());
                cp.updated_at = Utc::now();
                self.store.save(cp)?;
                self.record(
                    Receipt::new(&cp.job_id, &name, ACTION_ERROR)
                        .with_inputs_hash(inputs_hash)
                        .with_notes(format!("status={} error={}", cp.status, err)),
                )?;
                tracing::warn!(job_id = %cp.job_id, stage = %name, status = %cp.status, error = %err, "stage failed");
                Err(JobError::StageFailed {
                    job_id: cp.job_id.clone(),
                    stage: name,
                    source: err,
                })
            }
        }
    }

    /// Append completion receipts the checkpoint claims but the ledger lacks.
    fn recover_receipts(&self, cp: &JobCheckpoint, inputs_hash: &str) -> Result<(), JobError> {
        let recorded = self.ledger.read_by_job(&cp.job_id)?;
        let completed: BTreeSet<&str> = recorded
            .iter()
            .filter(|r| r.action == ACTION_STAGE_COMPLETE)
            .map(|r| r.stage.as_str())
            .collect();

        for stage in &cp.completed_stages {
            if completed.contains(stage.as_str()) {
                continue;
            }
            let mut receipt = Receipt::new(&cp.job_id, stage, ACTION_STAGE_COMPLETE)
                .with_inputs_hash(inputs_hash)
                .with_notes("recovered=true");
            if let Some(hash) = cp.output_hashes.get(stage) {
                receipt = receipt.with_outputs_hash(hash);
            }
            self.record(receipt)?;
            tracing::warn!(job_id = %cp.job_id, stage = %stage, "recovered missing STAGE_COMPLETE receipt");
        }

        let job_done = recorded
            .iter()
            .any(|r| r.stage == JOB_STAGE && r.action == ACTION_JOB_COMPLETE);
        if cp.status == JobStatus::Completed && !job_done {
            self.record(
                Receipt::new(&cp.job_id, JOB_STAGE, ACTION_JOB_COMPLETE)
                    .with_inputs_hash(inputs_hash)
                    .with_outputs_hash(cp.final_outputs_hash()?)
                    .with_notes("recovered=true"),
            )?;
            tracing::warn!(job_id = %cp.job_id, "recovered missing JOB_COMPLETE receipt");
        }
        Ok(())
    }

    fn record(&self, receipt: Receipt) -> Result<Receipt, JobError> {
        Ok(self.ledger.append(receipt)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mathison_crypto::SigningKey;
    use mathison_receipts::store::StoredEntry;
    use mathison_receipts::{MemoryBackend, ReceiptBackend, ReceiptError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct Echo(&'static str);

    impl Stage for Echo {
        fn name(&self) -> &str {
            self.0
        }

        fn run(&self, ctx: &StageContext<'_>) -> Result<Value, StageError> {
            Ok(json!({ "stage": self.0, "inputs": ctx.inputs }))
        }
    }

    struct Explode {
        calls: Arc<AtomicUsize>,
        fatal: bool,
    }

    impl Stage for Explode {
        fn name(&self) -> &str {
            "EXPLODE"
        }

        fn run(&self, _ctx: &StageContext<'_>) -> Result<Value, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fatal {
                Err(StageError::fatal("bad document"))
            } else {
                Err(StageError::retryable("transient"))
            }
        }
    }

    // Fails the first append matching `(stage, action)`, like a crash right
    // after the checkpoint was saved.
    struct DropOnce {
        inner: MemoryBackend,
        stage: &'static str,
        action: &'static str,
        dropped: bool,
    }

    impl ReceiptBackend for DropOnce {
        fn append(&mut self, receipt: &Receipt) -> Result<(), ReceiptError> {
            if !self.dropped && receipt.stage == self.stage && receipt.action == self.action {
                self.dropped = true;
                return Err(ReceiptError::WriteFailed(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "process killed",
                )));
            }
            self.inner.append(receipt)
        }

        fn entries(&self) -> Result<Vec<StoredEntry>, ReceiptError> {
            self.inner.entries()
        }

        fn describe(&self) -> String {
            "drop-once".to_string()
        }
    }

    fn runner_dropping(dir: &std::path::Path, stage: &'static str, action: &'static str) -> JobRunner {
        let store = CheckpointStore::new(dir.join("checkpoints")).unwrap();
        let backend = DropOnce {
            inner: MemoryBackend::new(),
            stage,
            action,
            dropped: false,
        };
        let ledger = ReceiptLedger::new(Box::new(backend), SigningKey::ephemeral().unwrap());
        JobRunner::new(store, Arc::new(ledger))
    }

    fn count(runner: &JobRunner, job_id: &str, stage: &str, action: &str) -> usize {
        runner
            .ledger()
            .read_by_job(job_id)
            .unwrap()
            .iter()
            .filter(|r| r.stage == stage && r.action == action)
            .count()
    }

    fn runner(dir: &std::path::Path) -> JobRunner {
        let store = CheckpointStore::new(dir.join("checkpoints")).unwrap();
        let (ledger, _) = ReceiptLedger::in_memory(SigningKey::ephemeral().unwrap());
        JobRunner::new(store, Arc::new(ledger))
    }

    #[test]
    fn completed_job_returns_cached_outcome() {
        let dir = tempdir().unwrap();
        let runner = runner(dir.path());
        let def = JobDefinition::new("echo").with_stage(Echo("A")).with_stage(Echo("B"));

        let first = runner.run("job-1", &def, json!({"n": 1})).unwrap();
        assert_eq!(first.status, JobStatus::Completed);
        assert_eq!(first.final_output.as_ref().unwrap()["stage"], "B");
        let receipts_after_first = runner.ledger().len().unwrap();

        let again = runner.run("job-1", &def, json!({"n": 1})).unwrap();
        assert_eq!(again.output_hashes, first.output_hashes);
        assert_eq!(runner.ledger().len().unwrap(), receipts_after_first);
    }

    #[test]
    fn changed_inputs_rejected_on_resume() {
        let dir = tempdir().unwrap();
        let runner = runner(dir.path());
        let def = JobDefinition::new("echo").with_stage(Echo("A"));
        runner.run("job-1", &def, json!({"n": 1})).unwrap();

        let err = runner.run("job-1", &def, json!({"n": 2})).unwrap_err();
        assert!(matches!(err, JobError::InputsMismatch { .. }));

        let other = JobDefinition::new("other").with_stage(Echo("A"));
        let err = runner.run("job-1", &other, json!({"n": 1})).unwrap_err();
        assert!(matches!(err, JobError::JobTypeMismatch { .. }));
    }

    #[test]
    fn fatal_failure_is_terminal() {
        let dir = tempdir().unwrap();
        let runner = runner(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));
        let def = JobDefinition::new("boom").with_stage(Echo("A")).with_stage(Explode {
            calls: calls.clone(),
            fatal: true,
        });

        let err = runner.run("job-f", &def, json!({})).unwrap_err();
        assert!(matches!(err, JobError::StageFailed { ref stage, .. } if stage == "EXPLODE"));
        let cp = runner.store().load("job-f").unwrap().unwrap();
        assert_eq!(cp.status, JobStatus::Failed);

        let err = runner.run("job-f", &def, json!({})).unwrap_err();
        assert!(matches!(err, JobError::AlreadyFailed { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retryable_failure_records_error_receipt() {
        let dir = tempdir().unwrap();
        let runner = runner(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));
        let def = JobDefinition::new("flaky").with_stage(Explode {
            calls: calls.clone(),
            fatal: false,
        });

        assert!(runner.run("job-r", &def, json!({})).is_err());
        let cp = runner.store().load("job-r").unwrap().unwrap();
        assert_eq!(cp.status, JobStatus::ResumableFailure);
        assert_eq!(cp.current_stage.as_deref(), Some("EXPLODE"));

        let receipts = runner.ledger().read_by_job("job-r").unwrap();
        let actions: Vec<&str> = receipts.iter().map(|r| r.action.as_str()).collect();
        assert_eq!(actions, vec![ACTION_JOB_START, ACTION_STAGE_START, ACTION_ERROR]);
        assert!(runner.ledger().validate_chain().unwrap().valid);
    }

    #[test]
    fn lost_stage_complete_receipt_is_recovered_on_resume() {
        let dir = tempdir().unwrap();
        let runner = runner_dropping(dir.path(), "A", ACTION_STAGE_COMPLETE);
        let def = JobDefinition::new("echo").with_stage(Echo("A")).with_stage(Echo("B"));

        let err = runner.run("job-c", &def, json!({"n": 1})).unwrap_err();
        assert!(matches!(err, JobError::Receipt(_)));
        let cp = runner.store().load("job-c").unwrap().unwrap();
        assert!(cp.is_stage_complete("A"));
        assert_eq!(count(&runner, "job-c", "A", ACTION_STAGE_COMPLETE), 0);

        let outcome = runner.run("job-c", &def, json!({"n": 1})).unwrap();
        assert_eq!(outcome.skipped_stages, vec!["A"]);
        assert_eq!(count(&runner, "job-c", "A", ACTION_STAGE_START), 1);
        assert_eq!(count(&runner, "job-c", "A", ACTION_STAGE_COMPLETE), 1);
        assert_eq!(count(&runner, "job-c", "B", ACTION_STAGE_COMPLETE), 1);

        let recovered = runner
            .ledger()
            .read_by_job("job-c")
            .unwrap()
            .into_iter()
            .find(|r| r.stage == "A" && r.action == ACTION_STAGE_COMPLETE)
            .unwrap();
        assert_eq!(recovered.notes.as_deref(), Some("recovered=true"));
        assert_eq!(recovered.outputs_hash.as_deref(), Some(outcome.output_hashes["A"].as_str()));
        assert!(runner.ledger().validate_chain().unwrap().valid);
    }

    #[test]
    fn lost_job_complete_receipt_is_recovered() {
        let dir = tempdir().unwrap();
        let runner = runner_dropping(dir.path(), JOB_STAGE, ACTION_JOB_COMPLETE);
        let def = JobDefinition::new("echo").with_stage(Echo("A"));

        assert!(runner.run("job-d", &def, json!({})).is_err());
        assert_eq!(
            runner.store().load("job-d").unwrap().unwrap().status,
            JobStatus::Completed
        );
        assert_eq!(count(&runner, "job-d", JOB_STAGE, ACTION_JOB_COMPLETE), 0);

        runner.run("job-d", &def, json!({})).unwrap();
        assert_eq!(count(&runner, "job-d", JOB_STAGE, ACTION_JOB_COMPLETE), 1);

        // Nothing left to recover.
        let len = runner.ledger().len().unwrap();
        runner.run("job-d", &def, json!({})).unwrap();
        assert_eq!(runner.ledger().len().unwrap(), len);
    }
}
