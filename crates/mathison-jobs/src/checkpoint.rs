// checkpoint.rs - Persisted progress of one job.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mathison_crypto::hasher;

use crate::error::JobError;

/// Job lifecycle status.
///
/// ```text
/// RUNNING ──► COMPLETED
///    │
///    ├──► RESUMABLE_FAILURE ──► RUNNING (same job_id, same inputs)
///    │
///    └──► FAILED (fatal stage error; terminal)
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Running,
    ResumableFailure,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::ResumableFailure => write!(f, "RESUMABLE_FAILURE"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Checkpoint for one job, stored as `<checkpoints_dir>/<job_id>.json`.
///
/// `completed_stages` only grows and an entry in `stage_outputs` never
/// changes once its stage is complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobCheckpoint {
    pub job_id: String,
    pub job_type: String,
    pub status: JobStatus,
    pub current_stage: Option<String>,
    pub completed_stages: Vec<String>,
    pub inputs: Value,
    pub inputs_hash: String,
    pub stage_outputs: BTreeMap<String, Value>,
    /// SHA-256 of each stage output's canonical JSON.
    pub output_hashes: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// How many times the job has been started (1 on the first run).
    pub attempts: u32,
    pub error: Option<String>,
}

impl JobCheckpoint {
    pub fn new(job_id: &str, job_type: &str, inputs: Value) -> Result<Self, JobError> {
        let now = Utc::now();
        Ok(Self {
            job_id: job_id.to_string(),
            job_type: job_type.to_string(),
            status: JobStatus::Running,
            current_stage: None,
            completed_stages: Vec::new(),
            inputs_hash: hasher::hash_canonical(&inputs)?,
            inputs,
            stage_outputs: BTreeMap::new(),
            output_hashes: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            attempts: 1,
            error: None,
        })
    }

    pub fn is_stage_complete(&self, stage: &str) -> bool {
        self.completed_stages.iter().any(|s| s == stage)
    }

    /// Record a stage's output and mark it complete. Returns the output hash.
    pub fn record_stage(&mut self, stage: &str, output: Value) -> Result<String, JobError> {
        if self.is_stage_complete(stage) {
            return Err(JobError::StageAlreadyComplete {
                job_id: self.job_id.clone(),
                stage: stage.to_string(),
            });
        }
        let hash = hasher::hash_canonical(&output)?;
        self.stage_outputs.insert(stage.to_string(), output);
        self.output_hashes.insert(stage.to_string(), hash.clone());
        self.completed_stages.push(stage.to_string());
        self.updated_at = Utc::now();
        Ok(hash)
    }

    /// Hash over every stage output hash, in stage order.
    pub fn final_outputs_hash(&self) -> Result<String, JobError> {
        let ordered: Vec<(&String, &String)> = self
            .completed_stages
            .iter()
            .filter_map(|s| self.output_hashes.get_key_value(s))
            .collect();
        Ok(hasher::hash_canonical(&ordered)?)
    }
}
