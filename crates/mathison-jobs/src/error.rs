// error.rs - Error types for the job runner.

use std::path::PathBuf;

use thiserror::Error;

/// Why a stage did not produce output.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    /// The job can be resumed by re-running it with the same id.
    #[error("{0}")]
    Retryable(String),

    /// The job is marked FAILED and will not resume.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl StageError {
    pub fn retryable(message: impl Into<String>) -> Self {
        StageError::Retryable(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        StageError::Fatal(message.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StageError::Fatal(_))
    }
}

/// Errors that can occur while running or inspecting jobs.
#[derive(Debug, Error)]
pub enum JobError {
    /// A checkpoint file could not be read or written.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A checkpoint could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Job ids become file names, so path-like ids are rejected.
    #[error("invalid job id '{job_id}'")]
    InvalidJobId { job_id: String },

    /// A resumed job was given different inputs than it started with.
    #[error("job '{job_id}' inputs changed: checkpoint has {expected}, got {actual}")]
    InputsMismatch {
        job_id: String,
        expected: String,
        actual: String,
    },

    /// A job id was reused for a different job type.
    #[error("job '{job_id}' is a '{expected}' job, not '{actual}'")]
    JobTypeMismatch {
        job_id: String,
        expected: String,
        actual: String,
    },

    /// The job failed fatally earlier and cannot resume.
    #[error("job '{job_id}' previously failed: {error}")]
    AlreadyFailed { job_id: String, error: String },

    /// A stage failed. The checkpoint and an ERROR receipt were recorded.
    #[error("job '{job_id}' stage '{stage}' failed: {source}")]
    StageFailed {
        job_id: String,
        stage: String,
        #[source]
        source: StageError,
    },

    /// Completed stage outputs are immutable.
    #[error("job '{job_id}' stage '{stage}' is already complete")]
    StageAlreadyComplete { job_id: String, stage: String },

    /// A receipt could not be recorded.
    #[error("receipt error: {0}")]
    Receipt(#[from] mathison_receipts::ReceiptError),

    #[error("crypto error: {0}")]
    Crypto(#[from] mathison_crypto::CryptoError),
}
