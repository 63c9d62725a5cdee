//! # mathison-jobs
//!
//! Checkpointed multi-stage jobs. A job is an ordered list of [`Stage`]s;
//! after each stage the runner persists a [`JobCheckpoint`] and appends a
//! receipt, so a crashed or failed job resumes from its last completed
//! stage instead of starting over.

pub mod checkpoint;
pub mod error;
pub mod runner;
pub mod store;

pub use checkpoint::{JobCheckpoint, JobStatus};
pub use error::{JobError, StageError};
pub use runner::{JobDefinition, JobOutcome, JobRunner, Stage, StageContext};
pub use store::CheckpointStore;
